//! Browser Control - CDP control plane
//!
//! Opens or attaches to a Chrome/Chromium instance over the DevTools
//! protocol and turns its single WebSocket into:
//!
//! 1. **Scoped calls**: every command runs under a [`Scope`] carrying
//!    cancellation and an optional deadline
//! 2. **Event fan-out**: one stream in, any number of independent
//!    subscribers out ([`EventBus`])
//! 3. **Page lifecycle**: pages share the connection but own their session
//!
//! ```text
//! Browser ──owns──> Connection ──> Transport (CDPClient / WebSocket)
//!    │                  ├── EventBus<CDPEvent>   (event pump)
//!    │                  └── FatalSink            (fatal drain)
//!    └──creates──> Page ──> CDPSession, Mouse, Keyboard
//! ```

pub mod browser;
pub mod cdp;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod fatal;
pub mod input;
pub mod locator;
pub mod page;
pub mod scope;

pub use browser::Browser;
pub use cdp::{CDPClient, CDPEvent, CDPSession, Transport};
pub use config::BrowserConfig;
pub use connection::{Connection, ConnectionOptions};
pub use error::{BrowserError, Result};
pub use events::{EventBus, Subscription};
pub use fatal::{FatalHandler, FatalSink};
pub use input::{Keyboard, Mouse, MouseButton};
pub use locator::{ChromeLocator, LaunchArgs, ProcessLocator};
pub use page::Page;
pub use scope::{CancelHandle, Scope};
