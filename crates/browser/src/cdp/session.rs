//! CDP Session - a flattened session attached to one target
//!
//! Design: lightweight handle over the shared connection with the
//! session id baked in. All sessions share the same WebSocket.

use serde_json::{json, Value};
use std::sync::Arc;

use super::protocol::{decode_result, AttachToTargetResult, SessionId, TargetId, TargetInfo};
use crate::connection::Connection;
use crate::error::Result;
use crate::scope::Scope;

/// Domains enabled on every new page session
pub const DEFAULT_DOMAINS: &[&str] = &["Page", "Runtime"];

/// CDP Session bound to a specific target
#[derive(Clone)]
pub struct CDPSession {
    connection: Arc<Connection>,

    /// Target this session is attached to
    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,
}

impl CDPSession {
    /// Attach to a target and enable `domains` on the new session
    pub async fn attach(
        connection: Arc<Connection>,
        scope: &Scope,
        target_id: TargetId,
        domains: &[&str],
    ) -> Result<Self> {
        let result = connection
            .call(
                scope,
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;

        let attach_result: AttachToTargetResult = decode_result("Target.attachToTarget", result)?;
        let session = Self {
            connection,
            target_id,
            session_id: attach_result.session_id,
        };

        // Enable all domains in parallel; any failure fails the attach
        let methods: Vec<String> = domains.iter().map(|d| format!("{}.enable", d)).collect();
        let enables = methods
            .iter()
            .map(|method| session.send(scope, method, None));
        for result in futures_util::future::join_all(enables).await {
            result?;
        }

        tracing::debug!(
            target = %session.target_id,
            session = %session.session_id,
            "Attached to target"
        );
        Ok(session)
    }

    /// Send command within this session's context
    pub async fn send(&self, scope: &Scope, method: &str, params: Option<Value>) -> Result<Value> {
        self.connection
            .call(scope, method, params, Some(self.session_id.clone()))
            .await
    }

    /// Get current target info (browser-level call)
    pub async fn get_target_info(&self, scope: &Scope) -> Result<TargetInfo> {
        let result = self
            .connection
            .call(
                scope,
                "Target.getTargetInfo",
                Some(json!({ "targetId": &self.target_id })),
                None,
            )
            .await?;

        decode_result("Target.getTargetInfo", result["targetInfo"].clone())
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}
