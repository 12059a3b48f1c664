//! Mouse and keyboard controllers, one of each per page
//!
//! Thin wrappers over the `Input` domain. With tracing enabled on the
//! browser config every action is logged before it is sent.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::cdp::session::CDPSession;
use crate::error::Result;
use crate::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// What both controllers need to reach their page
#[derive(Clone)]
pub(crate) struct InputChannel {
    session: CDPSession,
    scope: Scope,
    trace: bool,
}

impl InputChannel {
    pub(crate) fn new(session: CDPSession, scope: Scope, trace: bool) -> Self {
        Self {
            session,
            scope,
            trace,
        }
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<()> {
        if self.trace {
            tracing::info!(target_id = %self.session.target_id, "{} {}", method, params);
        }
        self.session
            .send(&self.scope, method, Some(params))
            .await?;
        Ok(())
    }
}

pub struct Mouse {
    input: InputChannel,
    position: Arc<Mutex<(f64, f64)>>,
}

impl Mouse {
    pub(crate) fn new(input: InputChannel) -> Self {
        Self {
            input,
            position: Arc::new(Mutex::new((0.0, 0.0))),
        }
    }

    /// Same pointer, different scope
    pub(crate) fn rebind(&self, input: InputChannel) -> Self {
        Self {
            input,
            position: self.position.clone(),
        }
    }

    pub fn position(&self) -> (f64, f64) {
        *self.position.lock()
    }

    pub async fn move_to(&self, x: f64, y: f64) -> Result<()> {
        self.input
            .dispatch(
                "Input.dispatchMouseEvent",
                json!({ "type": "mouseMoved", "x": x, "y": y }),
            )
            .await?;
        *self.position.lock() = (x, y);
        Ok(())
    }

    /// Press and release `button` at the current position
    pub async fn click(&self, button: MouseButton) -> Result<()> {
        let (x, y) = self.position();
        for kind in ["mousePressed", "mouseReleased"] {
            self.input
                .dispatch(
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": kind,
                        "x": x,
                        "y": y,
                        "button": button,
                        "clickCount": 1,
                    }),
                )
                .await?;
        }
        Ok(())
    }
}

pub struct Keyboard {
    input: InputChannel,
}

impl Keyboard {
    pub(crate) fn new(input: InputChannel) -> Self {
        Self { input }
    }

    /// Key down + key up. Single characters also produce text input.
    pub async fn press(&self, key: &str) -> Result<()> {
        let text = (key.chars().count() == 1).then_some(key);

        let mut down = json!({ "type": "keyDown", "key": key });
        if let Some(text) = text {
            down["text"] = json!(text);
        }
        self.input.dispatch("Input.dispatchKeyEvent", down).await?;
        self.input
            .dispatch(
                "Input.dispatchKeyEvent",
                json!({ "type": "keyUp", "key": key }),
            )
            .await
    }

    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.input
            .dispatch("Input.insertText", json!({ "text": text }))
            .await
    }
}
