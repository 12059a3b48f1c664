//! Error types for browser control
//!
//! Flat hierarchy. Callers usually only care about three questions:
//! did the browser say no, did my scope fire, or is the connection gone.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to connect to browser: {0}")]
    Connection(String),

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Browser is not open")]
    NotOpen,

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Transport terminated unexpectedly: {0}")]
    TransportClosed(String),
}

impl BrowserError {
    /// True when the error came from a scope firing rather than the browser.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BrowserError::Cancelled | BrowserError::Timeout)
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            BrowserError::Closed | BrowserError::TransportClosed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(BrowserError::Timeout.is_cancellation());
        assert!(BrowserError::Cancelled.is_cancellation());
        assert!(!BrowserError::Closed.is_cancellation());

        let protocol = BrowserError::Protocol {
            code: -32000,
            message: "No target with given id found".to_string(),
        };
        assert!(!protocol.is_cancellation());
        assert!(!protocol.is_closed());
        assert_eq!(
            protocol.to_string(),
            "CDP protocol error: -32000 - No target with given id found"
        );
    }
}
