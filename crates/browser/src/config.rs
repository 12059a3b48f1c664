//! Browser configuration

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BrowserError;
use crate::fatal::FatalHandler;

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Endpoint to attach to (ws://, http:// or host:port).
    /// If it does not answer, a local browser is launched instead.
    pub control_url: Option<String>,

    /// Device metrics applied to every new page
    /// (`Emulation.setDeviceMetricsOverride` params)
    pub viewport: Option<Value>,

    /// Launch without `--headless`
    pub foreground: bool,

    /// Delay before every input command
    #[serde(with = "duration_ms")]
    pub slow_motion: Duration,

    /// Log every input action before it is sent
    pub trace: bool,

    /// Replaces the default `tracing::error!` for fatal errors
    #[serde(skip)]
    pub on_fatal: Option<FatalHandler>,
}

impl BrowserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `BROWSER_CONTROL_URL`, `BROWSER_FOREGROUND`,
    /// `BROWSER_SLOW_MOTION_MS` and `BROWSER_TRACE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
        };

        Self {
            control_url: lookup("BROWSER_CONTROL_URL").filter(|v| !v.trim().is_empty()),
            foreground: flag("BROWSER_FOREGROUND"),
            trace: flag("BROWSER_TRACE"),
            slow_motion: lookup("BROWSER_SLOW_MOTION_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn control_url(mut self, url: impl Into<String>) -> Self {
        self.control_url = Some(url.into());
        self
    }

    pub fn viewport(mut self, viewport: Value) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn foreground(mut self, foreground: bool) -> Self {
        self.foreground = foreground;
        self
    }

    pub fn slow_motion(mut self, delay: Duration) -> Self {
        self.slow_motion = delay;
        self
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn on_fatal<F>(mut self, handler: F) -> Self
    where
        F: Fn(BrowserError) + Send + Sync + 'static,
    {
        self.on_fatal = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for BrowserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserConfig")
            .field("control_url", &self.control_url)
            .field("viewport", &self.viewport)
            .field("foreground", &self.foreground)
            .field("slow_motion", &self.slow_motion)
            .field("trace", &self.trace)
            .field("on_fatal", &self.on_fatal.is_some())
            .finish()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
