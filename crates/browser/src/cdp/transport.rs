//! Transport seam between the control plane and the wire
//!
//! The connection only needs two things from the wire: send a command and
//! get its result, and a stream of unsolicited events. How messages are
//! framed and correlated is the transport's business.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::protocol::{CDPEvent, Command};
use crate::error::Result;
use crate::scope::Scope;

/// Events in arrival order. Ends when the transport goes away.
pub type EventStream = mpsc::UnboundedReceiver<CDPEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `command` and wait for its matching response.
    ///
    /// Must return promptly once `scope` fires.
    async fn call(&self, scope: &Scope, command: Command) -> Result<Value>;

    /// Take the event stream. Only the first call gets it.
    fn events(&self) -> Option<EventStream>;

    /// Release the underlying channel. Pending calls fail with `Closed`.
    async fn close(&self) -> Result<()>;
}
