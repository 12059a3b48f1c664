//! Page - one attached page target
//!
//! A page shares its browser's connection and scope. It never closes or
//! reconfigures the connection; it only issues calls on its own session.

use serde_json::{json, Value};
use std::time::Duration;

use crate::browser::Browser;
use crate::cdp::protocol::{SessionId, TargetId, TargetInfo};
use crate::cdp::session::{CDPSession, DEFAULT_DOMAINS};
use crate::error::{BrowserError, Result};
use crate::input::{InputChannel, Keyboard, Mouse};
use crate::scope::Scope;

pub struct Page {
    target_id: TargetId,
    browser: Browser,
    session: CDPSession,
    mouse: Mouse,
    keyboard: Keyboard,
}

impl Page {
    /// Attach to `target_id` and run the session handshake.
    ///
    /// Any failure here is the creation error; no page is returned.
    pub(crate) async fn init(browser: Browser, target_id: TargetId) -> Result<Page> {
        let connection = browser.connection()?;
        let session =
            CDPSession::attach(connection, browser.scope(), target_id.clone(), DEFAULT_DOMAINS)
                .await?;

        let page = Page::assemble(browser, session);

        if let Some(viewport) = page.browser.config().viewport.clone() {
            page.call("Emulation.setDeviceMetricsOverride", Some(viewport))
                .await?;
        }

        tracing::debug!(target = %page.target_id, "Page ready");
        Ok(page)
    }

    fn assemble(browser: Browser, session: CDPSession) -> Page {
        let input = InputChannel::new(
            session.clone(),
            browser.scope().clone(),
            browser.config().trace,
        );
        Page {
            target_id: session.target_id.clone(),
            mouse: Mouse::new(input.clone()),
            keyboard: Keyboard::new(input),
            browser,
            session,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    pub fn scope(&self) -> &Scope {
        self.browser.scope()
    }

    pub fn mouse(&self) -> &Mouse {
        &self.mouse
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    /// Same page, calls bounded by `timeout`
    pub fn timeout(&self, timeout: Duration) -> Page {
        let browser = self.browser.timeout(timeout);
        let input = InputChannel::new(
            self.session.clone(),
            browser.scope().clone(),
            browser.config().trace,
        );
        Page {
            target_id: self.target_id.clone(),
            mouse: self.mouse.rebind(input.clone()),
            keyboard: Keyboard::new(input),
            browser,
            session: self.session.clone(),
        }
    }

    /// Send a command on this page's session
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.session.send(self.scope(), method, params).await
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let result = self
            .call("Page.navigate", Some(json!({ "url": url })))
            .await?;
        match result["errorText"].as_str() {
            Some(error) if !error.is_empty() => Err(BrowserError::NavigationFailed(format!(
                "{url}: {error}"
            ))),
            _ => Ok(()),
        }
    }

    /// Wait for the next event named `name` raised on this page's session
    pub async fn wait_event(&self, name: &str) -> Result<Value> {
        let session_id: Option<SessionId> = Some(self.session.session_id.clone());
        let event = self
            .session
            .connection()
            .events()
            .until(self.scope(), |e| e.method == name && e.session_id == session_id)
            .await?;
        Ok(event.params.unwrap_or(Value::Null))
    }

    pub async fn info(&self) -> Result<TargetInfo> {
        self.session.get_target_info(self.scope()).await
    }

    /// Close the target. The browser stays open.
    pub async fn close(&self) -> Result<()> {
        self.browser
            .call(
                "Target.closeTarget",
                Some(json!({ "targetId": &self.target_id })),
            )
            .await?;
        Ok(())
    }
}
