//! CDP Protocol Types
//!
//! Only the envelope and the few payloads the control plane reads itself.
//! Everything else stays a `serde_json::Value`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrowserError, Result};

/// Decode the result of `method`, naming the method when the shape is wrong
pub fn decode_result<T: DeserializeOwned>(method: &str, result: Value) -> Result<T> {
    serde_json::from_value(result)
        .map_err(|e| BrowserError::InvalidResponse(format!("{method}: {e}")))
}

/// Request ID - monotonically increasing
pub type RequestId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// A command before the transport assigns it an id
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub method: String,
    pub params: Option<Value>,
    pub session_id: Option<SessionId>,
}

impl Command {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn into_request(self, id: RequestId) -> CDPRequest {
        CDPRequest {
            id,
            method: self.method,
            params: self.params,
            session_id: self.session_id,
        }
    }
}

/// CDP Request sent to browser
#[derive(Debug, Clone, Serialize)]
pub struct CDPRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// CDP Response from browser
#[derive(Debug, Clone, Deserialize)]
pub struct CDPResponse {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<CDPResponseError>,
}

/// Error object carried by a failed response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CDPResponseError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// CDP Event from browser (no request ID)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CDPEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl CDPEvent {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params: Some(params),
            session_id: None,
        }
    }
}

/// Anything the browser sends us
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CDPMessage {
    Response(CDPResponse),
    Event(CDPEvent),
}

/// Entry of Target.getTargets / Target.getTargetInfo
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetInfo {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

/// Result of Target.getTargets
#[derive(Debug, Clone, Deserialize)]
pub struct GetTargetsResult {
    #[serde(rename = "targetInfos")]
    pub target_infos: Vec<TargetInfo>,
}

/// Result of Target.createTarget
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTargetResult {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
}

/// Result of Target.attachToTarget
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}
