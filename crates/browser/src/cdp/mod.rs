//! CDP (Chrome DevTools Protocol) wire layer
//!
//! Core principle: Single WebSocket connection, multiplexed sessions.
//! The connection above only sees the `Transport` trait.

pub mod client;
#[cfg(test)]
pub(crate) mod mock;
pub mod protocol;
pub mod session;
pub mod transport;

pub use client::CDPClient;
pub use protocol::{CDPEvent, CDPRequest, CDPResponse, Command, SessionId, TargetId, TargetInfo};
pub use session::CDPSession;
pub use transport::{EventStream, Transport};
