//! Process locator - find a debugging endpoint, or start a browser that has one
//!
//! `locate` turns whatever the user configured (a ws:// URL, an http://
//! URL, or a bare host:port) into a WebSocket debugger URL. `launch`
//! starts a local Chrome/Chromium on a free port and waits until its
//! endpoint answers.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use url::Url;
use uuid::Uuid;

use crate::error::{BrowserError, Result};

/// Command-line flags, `--flag` → optional value
pub type LaunchArgs = BTreeMap<String, Option<String>>;

/// Where to look when nothing is configured
pub const DEFAULT_CONTROL_URL: &str = "http://127.0.0.1:9222";

/// Known Chrome binary locations, in search priority order.
const KNOWN_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/homebrew/bin/chromium",
    "/usr/local/bin/chromium",
];

#[async_trait]
pub trait ProcessLocator: Send + Sync {
    /// Resolve `candidate` to a reachable WebSocket debugger URL
    async fn locate(&self, candidate: &str) -> Result<String>;

    /// Start a browser with `args` and return its WebSocket debugger URL
    async fn launch(&self, args: &LaunchArgs) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Locator for local Chrome/Chromium installs
pub struct ChromeLocator {
    http: reqwest::Client,
    binary: Option<PathBuf>,
    launch_timeout: Duration,
}

impl ChromeLocator {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap_or_default(),
            binary: None,
            launch_timeout: Duration::from_secs(10),
        }
    }

    /// Use this binary instead of searching for one
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launch_timeout = timeout;
        self
    }

    /// The flag set a launched browser gets unless the caller changes it
    pub fn default_args() -> LaunchArgs {
        [
            "--headless",
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-backgrounding-occluded-windows",
            "--disable-breakpad",
            "--disable-client-side-phishing-detection",
            "--disable-default-apps",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-hang-monitor",
            "--disable-ipc-flooding-protection",
            "--disable-popup-blocking",
            "--disable-prompt-on-repost",
            "--disable-renderer-backgrounding",
            "--disable-sync",
            "--enable-automation",
            "--metrics-recording-only",
            "--no-first-run",
            "--password-store=basic",
            "--use-mock-keychain",
        ]
        .into_iter()
        .map(|flag| (flag.to_string(), None))
        .chain([
            (
                "--disable-features".to_string(),
                Some("site-per-process,TranslateUI".to_string()),
            ),
            ("--force-color-profile".to_string(), Some("srgb".to_string())),
        ])
        .collect()
    }

    async fn wait_for_endpoint(&self, port: u16, child: &mut Child) -> Result<String> {
        let endpoint = format!("http://127.0.0.1:{port}");
        let deadline = tokio::time::Instant::now() + self.launch_timeout;

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;

            if let Some(status) = child.try_wait()? {
                return Err(BrowserError::LaunchFailed(format!(
                    "browser exited early with {status}"
                )));
            }

            match self.locate(&endpoint).await {
                Ok(ws_url) => return Ok(ws_url),
                Err(e) => tracing::trace!("Endpoint not ready yet: {}", e),
            }
        }

        let _ = child.kill().await;
        Err(BrowserError::LaunchFailed(format!(
            "browser did not expose {endpoint} within {:?}",
            self.launch_timeout
        )))
    }
}

impl Default for ChromeLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLocator for ChromeLocator {
    async fn locate(&self, candidate: &str) -> Result<String> {
        let url = parse_control_url(candidate)?;
        if matches!(url.scheme(), "ws" | "wss") {
            return Ok(url.to_string());
        }

        let version_url = url
            .join("/json/version")
            .map_err(|e| BrowserError::Connection(format!("{candidate}: {e}")))?;
        let info: VersionInfo = self
            .http
            .get(version_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(info.web_socket_debugger_url)
    }

    async fn launch(&self, args: &LaunchArgs) -> Result<String> {
        let binary = self
            .binary
            .clone()
            .or_else(find_chrome)
            .ok_or_else(|| {
                BrowserError::LaunchFailed("no Chrome or Chromium binary found".to_string())
            })?;

        let port = free_port()?;
        let mut args = args.clone();
        args.insert("--remote-debugging-port".to_string(), Some(port.to_string()));
        args.entry("--user-data-dir".to_string()).or_insert_with(|| {
            let dir = std::env::temp_dir().join(format!("browser-control-{}", Uuid::now_v7()));
            Some(dir.to_string_lossy().into_owned())
        });

        tracing::info!(binary = %binary.display(), port, "Launching browser");

        let mut child = Command::new(&binary)
            .args(command_line(&args))
            .arg("about:blank")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrowserError::LaunchFailed(format!("{}: {e}", binary.display())))?;

        let ws_url = self.wait_for_endpoint(port, &mut child).await?;

        // Dropping `child` before this point kills the process. From here on
        // the browser outlives this call and exits on Browser.close
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!("Browser process exited with {}", status),
                Err(e) => tracing::warn!("Failed to wait on browser process: {}", e),
            }
        });

        Ok(ws_url)
    }
}

/// Accepts ws://, http:// and bare host:port forms
pub fn parse_control_url(candidate: &str) -> Result<Url> {
    let candidate = candidate.trim();
    let with_scheme = if candidate.contains("://") {
        candidate.to_string()
    } else {
        format!("http://{candidate}")
    };
    Url::parse(&with_scheme).map_err(|e| BrowserError::Connection(format!("{candidate}: {e}")))
}

fn command_line(args: &LaunchArgs) -> Vec<String> {
    args.iter()
        .map(|(flag, value)| match value {
            Some(value) => format!("{flag}={value}"),
            None => flag.clone(),
        })
        .collect()
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Find a Chrome or Chromium binary: `CHROME_PATH` first, then known
/// install locations, then `PATH`.
pub fn find_chrome() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("CHROME_PATH") {
        let path = PathBuf::from(&env_path);
        if is_executable(&path) {
            return Some(path);
        }
        tracing::debug!(path = %env_path, "CHROME_PATH set but not executable, falling through");
    }

    if let Some(path) = KNOWN_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| is_executable(p))
    {
        return Some(path);
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| {
            ["google-chrome", "chromium", "chromium-browser", "chrome"]
                .into_iter()
                .map(move |name| dir.join(name))
        })
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && path
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
