//! Browser - the object callers configure, open, and close
//!
//! Lifecycle: `Unopened --open--> Opened --close--> Closed`. Closed is
//! terminal. Clones made with [`Browser::with_scope`] or
//! [`Browser::timeout`] share the connection and configuration and only
//! differ in the scope their calls run under.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::cdp::protocol::{
    decode_result, CDPEvent, CreateTargetResult, GetTargetsResult, TargetId,
};
use crate::cdp::{CDPClient, Transport};
use crate::config::BrowserConfig;
use crate::connection::{Connection, ConnectionOptions};
use crate::error::{BrowserError, Result};
use crate::events::Subscription;
use crate::locator::{ChromeLocator, ProcessLocator, DEFAULT_CONTROL_URL};
use crate::page::Page;
use crate::scope::{CancelHandle, Scope};

/// Upper bound on the best-effort `Browser.close` during close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

enum State {
    Unopened,
    Opened(Arc<Connection>),
    Closed,
}

struct Shared {
    config: BrowserConfig,
    locator: Arc<dyn ProcessLocator>,
    state: Mutex<State>,

    /// Serializes open and close
    lifecycle: AsyncMutex<()>,

    /// Cancels the root scope on close
    root_cancel: CancelHandle,
}

#[derive(Clone)]
pub struct Browser {
    shared: Arc<Shared>,
    scope: Scope,
}

impl Browser {
    pub fn new(config: BrowserConfig) -> Self {
        Self::with_locator(config, Arc::new(ChromeLocator::new()))
    }

    pub fn with_locator(config: BrowserConfig, locator: Arc<dyn ProcessLocator>) -> Self {
        let (root, root_cancel) = Scope::root();
        Self {
            shared: Arc::new(Shared {
                config,
                locator,
                state: Mutex::new(State::Unopened),
                lifecycle: AsyncMutex::new(()),
                root_cancel,
            }),
            scope: root,
        }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.shared.config
    }

    /// Scope every call made through this value runs under
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Same browser, different scope
    pub fn with_scope(&self, scope: Scope) -> Browser {
        Browser {
            shared: self.shared.clone(),
            scope,
        }
    }

    /// Same browser, calls bounded by `timeout` (and by this value's scope)
    pub fn timeout(&self, timeout: Duration) -> Browser {
        let (scope, _) = self.scope.with_timeout(timeout);
        self.with_scope(scope)
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Opened(conn) if conn.is_alive())
    }

    /// Attach to the configured endpoint, launching a browser if nothing answers.
    ///
    /// No-op when already open.
    pub async fn open(&self) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if self.check_reopen().await? {
            return Ok(());
        }

        let ws_url = self.scope.run(self.resolve_endpoint()).await?;
        let client = self
            .scope
            .run(async { CDPClient::connect(&ws_url).await })
            .await?;
        self.start(client).await
    }

    /// Open over an already established transport
    pub async fn open_with(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if self.check_reopen().await? {
            return Ok(());
        }
        self.start(transport).await
    }

    /// `Ok(true)` if a live connection already exists. Drops a dead one.
    async fn check_reopen(&self) -> Result<bool> {
        let stale = {
            let state = self.shared.state.lock();
            match &*state {
                State::Closed => return Err(BrowserError::Closed),
                State::Unopened => None,
                State::Opened(conn) if conn.is_alive() => return Ok(true),
                State::Opened(conn) => Some(conn.clone()),
            }
        };

        if let Some(conn) = stale {
            tracing::info!("Previous connection is dead, reopening");
            *self.shared.state.lock() = State::Unopened;
            if let Err(e) = conn.shutdown().await {
                tracing::debug!("Shutting down dead connection: {}", e);
            }
        }
        Ok(false)
    }

    async fn resolve_endpoint(&self) -> Result<String> {
        let config = &self.shared.config;
        let candidate = config.control_url.as_deref().unwrap_or(DEFAULT_CONTROL_URL);

        match self.shared.locator.locate(candidate).await {
            Ok(ws_url) => Ok(ws_url),
            Err(e) => {
                tracing::info!("No browser at {} ({}), launching one", candidate, e);
                let mut args = ChromeLocator::default_args();
                if config.foreground {
                    args.remove("--headless");
                }
                self.shared.locator.launch(&args).await
            }
        }
    }

    async fn start(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let options = ConnectionOptions {
            slow_motion: self.shared.config.slow_motion,
            on_fatal: self.shared.config.on_fatal.clone(),
        };
        let conn = match Connection::start(transport.clone(), options) {
            Ok(conn) => conn,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };

        let discover = conn
            .call(
                &self.scope,
                "Target.setDiscoverTargets",
                Some(json!({ "discover": true })),
                None,
            )
            .await;
        if let Err(e) = discover {
            let _ = conn.shutdown().await;
            return Err(e);
        }

        *self.shared.state.lock() = State::Opened(conn);
        tracing::info!("Browser opened");
        Ok(())
    }

    /// Close the browser and release the connection. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *self.shared.state.lock(), State::Closed);

        let result = match previous {
            State::Opened(conn) => {
                let (scope, _) = self.scope.with_timeout(CLOSE_TIMEOUT);
                conn.close(&scope).await
            }
            State::Unopened | State::Closed => Ok(()),
        };

        self.shared.root_cancel.cancel();
        tracing::info!("Browser closed");
        result
    }

    pub(crate) fn connection(&self) -> Result<Arc<Connection>> {
        match &*self.shared.state.lock() {
            State::Opened(conn) => Ok(conn.clone()),
            State::Unopened => Err(BrowserError::NotOpen),
            State::Closed => Err(BrowserError::Closed),
        }
    }

    /// Send a browser-level command
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.connection()?
            .call(&self.scope, method, params, None)
            .await
    }

    /// Subscribe to every protocol event from now on
    pub fn events(&self) -> Result<Subscription<CDPEvent>> {
        Ok(self.connection()?.subscribe())
    }

    /// Wait for the next event named `name` and return its params.
    ///
    /// Example names: `Page.javascriptDialogOpening`, `Page.frameNavigated`,
    /// `Target.targetCreated`.
    pub async fn wait_event(&self, name: &str) -> Result<Value> {
        let conn = self.connection()?;
        let event = conn
            .events()
            .until(&self.scope, |e| e.method == name)
            .await?;
        Ok(event.params.unwrap_or(Value::Null))
    }

    /// Open a new page at `url`
    pub async fn page(&self, url: &str) -> Result<Page> {
        let result = self
            .call("Target.createTarget", Some(json!({ "url": url })))
            .await?;
        let created: CreateTargetResult = decode_result("Target.createTarget", result)?;
        self.page_for(created.target_id).await
    }

    /// All page targets, each fully attached. The first failure aborts.
    pub async fn pages(&self) -> Result<Vec<Page>> {
        let result = self.call("Target.getTargets", None).await?;
        let targets: GetTargetsResult = decode_result("Target.getTargets", result)?;

        let mut pages = Vec::new();
        for info in targets.target_infos.into_iter().filter(|t| t.is_page()) {
            pages.push(self.page_for(info.target_id).await?);
        }
        Ok(pages)
    }

    /// Attach to an existing target
    pub async fn page_for(&self, target_id: TargetId) -> Result<Page> {
        Page::init(self.clone(), target_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::mock::MockTransport;
    use crate::locator::LaunchArgs;
    use async_trait::async_trait;

    async fn opened(config: BrowserConfig) -> (Browser, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let browser = Browser::new(config);
        browser.open_with(transport.clone()).await.unwrap();
        (browser, transport)
    }

    #[tokio::test]
    async fn test_open_enables_target_discovery() {
        let (browser, transport) = opened(BrowserConfig::default()).await;

        assert!(browser.is_open());
        let calls = transport.calls_to("Target.setDiscoverTargets");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].params, Some(json!({ "discover": true })));
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_twice_is_noop() {
        let (browser, transport) = opened(BrowserConfig::default()).await;

        browser.open_with(MockTransport::new()).await.unwrap();
        browser.open().await.unwrap();

        assert_eq!(transport.calls_to("Target.setDiscoverTargets").len(), 1);
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_discovery_leaves_browser_unopened() {
        let transport = MockTransport::new();
        transport.fail_method("Target.setDiscoverTargets");
        let browser = Browser::new(BrowserConfig::default());

        let err = browser.open_with(transport).await.unwrap_err();

        assert!(matches!(err, BrowserError::Protocol { .. }));
        assert!(!browser.is_open());
        assert!(matches!(
            browser.call("Browser.getVersion", None).await,
            Err(BrowserError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_created_page_is_listed() {
        let (browser, _transport) = opened(BrowserConfig::default()).await;

        let page = browser.page("about:blank").await.unwrap();
        let listed: Vec<_> = browser
            .pages()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.target_id().to_string())
            .collect();

        assert!(listed.contains(&page.target_id().to_string()));
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_pages_skips_non_page_targets() {
        let (browser, transport) = opened(BrowserConfig::default()).await;
        transport.add_target("W1", "service_worker");
        transport.add_target("P1", "page");

        let pages = browser.pages().await.unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].target_id(), "P1");
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_pages_fails_fast() {
        let (browser, transport) = opened(BrowserConfig::default()).await;
        transport.add_target("P1", "page");
        transport.add_target("P2", "page");
        transport.fail_method("Runtime.enable");

        assert!(browser.pages().await.is_err());
        // Stopped at the first target
        assert_eq!(transport.calls_to("Target.attachToTarget").len(), 1);
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_viewport_applied_to_new_pages() {
        let viewport = json!({"width": 390, "height": 844, "deviceScaleFactor": 3, "mobile": true});
        let (browser, transport) =
            opened(BrowserConfig::default().viewport(viewport.clone())).await;

        let page = browser.page("about:blank").await.unwrap();

        let overrides = transport.calls_to("Emulation.setDeviceMetricsOverride");
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].params, Some(viewport));
        assert_eq!(overrides[0].session_id.as_deref(), Some(page.session_id()));
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_event_blocks_until_named_event() {
        let (browser, transport) = opened(BrowserConfig::default()).await;
        let conn = browser.connection().unwrap();

        let waiter = {
            let browser = browser.clone();
            tokio::spawn(async move { browser.wait_event("Page.frameNavigated").await })
        };
        while conn.events().subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        transport.emit(CDPEvent::new("Page.loadEventFired", json!({ "timestamp": 1.0 })));
        transport.emit(CDPEvent::new(
            "Page.frameNavigated",
            json!({ "frame": { "url": "https://example.com" } }),
        ));

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params["frame"]["url"], "https://example.com");
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_event_with_expired_timeout() {
        let (browser, transport) = opened(BrowserConfig::default()).await;

        let res = browser
            .timeout(Duration::ZERO)
            .wait_event("Page.frameNavigated")
            .await;
        transport.emit(CDPEvent::new("Page.frameNavigated", json!({})));

        assert!(matches!(res, Err(BrowserError::Timeout)));
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_clone_shares_connection() {
        let (browser, _transport) = opened(BrowserConfig::default()).await;
        let bounded = browser.timeout(Duration::from_secs(30));

        assert!(Arc::ptr_eq(
            &browser.connection().unwrap(),
            &bounded.connection().unwrap()
        ));
        assert!(bounded.scope().deadline().is_some());
        assert!(browser.scope().deadline().is_none());

        bounded.call("Test.echo", None).await.unwrap();
        browser.close().await.unwrap();
        assert!(!bounded.is_open());
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_idempotent() {
        let (browser, transport) = opened(BrowserConfig::default()).await;
        let mut sub = browser.events().unwrap();

        browser.close().await.unwrap();
        browser.close().await.unwrap();

        assert_eq!(transport.calls_to("Browser.close").len(), 1);
        assert!(sub.recv().await.is_none());
        assert!(matches!(
            browser.call("Browser.getVersion", None).await,
            Err(BrowserError::Closed)
        ));
        assert!(matches!(
            browser.open_with(MockTransport::new()).await,
            Err(BrowserError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_unblocks_waiters() {
        let (browser, _transport) = opened(BrowserConfig::default()).await;
        let conn = browser.connection().unwrap();

        let waiter = {
            let browser = browser.timeout(Duration::from_secs(60));
            tokio::spawn(async move { browser.wait_event("Never.happens").await })
        };
        while conn.events().subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        browser.close().await.unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_closed() || err.is_cancellation());
        assert!(browser.scope().is_cancelled());
    }

    #[tokio::test]
    async fn test_transport_death_reaches_on_fatal() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let config = BrowserConfig::default().on_fatal(move |err| {
            let _ = tx.send(err);
        });
        let (browser, transport) = opened(config).await;

        transport.kill();

        assert!(matches!(
            rx.recv().await,
            Some(BrowserError::TransportClosed(_))
        ));
        browser.close().await.unwrap();
    }

    struct NoBrowser;

    #[async_trait]
    impl ProcessLocator for NoBrowser {
        async fn locate(&self, candidate: &str) -> Result<String> {
            Err(BrowserError::Connection(format!("{candidate} unreachable")))
        }

        async fn launch(&self, args: &LaunchArgs) -> Result<String> {
            assert!(!args.contains_key("--headless"));
            Err(BrowserError::LaunchFailed("no binary".to_string()))
        }
    }

    #[tokio::test]
    async fn test_open_falls_back_to_launch() {
        let browser = Browser::with_locator(
            BrowserConfig::default().foreground(true),
            Arc::new(NoBrowser),
        );

        let err = browser.open().await.unwrap_err();

        assert!(matches!(err, BrowserError::LaunchFailed(_)));
        assert!(!browser.is_open());
    }

    #[tokio::test]
    #[ignore] // Needs a local Chrome
    async fn test_real_browser_lifecycle() {
        let browser = Browser::new(BrowserConfig::from_env());
        browser.open().await.unwrap();

        let page = browser.page("about:blank").await.unwrap();
        println!("Created page: {}", page.target_id());

        browser.close().await.unwrap();
    }
}
