//! Chrome process management and the CDP-backed browser backend.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::driver::{BrowserBackend, ContextHandle, PageDriver};
use crate::error::BrowserError;

/// Launch settings for the managed Chrome instance.
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub headless: bool,
    /// Explicit binary path; autodetected when unset.
    pub executable: Option<PathBuf>,
    pub debug_port: u16,
    /// Profile directory; a temp dir is created when unset.
    pub profile_dir: Option<PathBuf>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            debug_port: 9222,
            profile_dir: None,
        }
    }
}

impl ChromeConfig {
    pub fn endpoint(&self) -> String {
        format!("http://localhost:{}", self.debug_port)
    }
}

/// Find a Chrome or Chromium executable on this machine.
pub fn find_chrome() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    let paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    ];

    #[cfg(target_os = "linux")]
    let paths = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ];

    #[cfg(target_os = "windows")]
    let paths = [
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ];

    paths.iter().map(|p| PathBuf::from(*p)).find(|p| p.exists())
}

/// A running Chrome with a connected CDP client; creates isolated contexts.
pub struct ChromeBackend {
    client: Arc<CdpClient>,
    /// Chrome process handle when this backend launched it.
    process: RwLock<Option<Child>>,
    /// Keeps the temp profile alive for the browser's lifetime.
    _profile_guard: Option<tempfile::TempDir>,
}

impl ChromeBackend {
    /// Connect to Chrome at the configured port, launching it if nothing is
    /// listening there yet.
    pub async fn launch(config: ChromeConfig) -> Result<Self, BrowserError> {
        let endpoint = config.endpoint();
        let mut process = None;
        let mut profile_guard = None;

        if !Self::is_running(&endpoint).await {
            info!("Chrome not running on port {}, launching", config.debug_port);

            let executable = config
                .executable
                .clone()
                .or_else(find_chrome)
                .ok_or(BrowserError::ChromeNotFound)?;

            let profile_dir = match &config.profile_dir {
                Some(dir) => dir.clone(),
                None => {
                    let tmp = tempfile::TempDir::with_prefix("webgate-profile-")
                        .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
                    let path = tmp.path().to_path_buf();
                    profile_guard = Some(tmp);
                    path
                }
            };

            let mut cmd = Command::new(&executable);
            cmd.arg(format!("--remote-debugging-port={}", config.debug_port))
                .arg(format!("--user-data-dir={}", profile_dir.display()))
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--disable-background-networking")
                .arg("--disable-sync")
                .arg("--disable-translate")
                .arg("--metrics-recording-only")
                .stdout(Stdio::null())
                .stderr(Stdio::null());

            if config.headless {
                cmd.arg("--headless=new");
            }

            let child = cmd
                .spawn()
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
            info!("Chrome launched with PID: {:?}", child.id());
            process = Some(child);

            // Wait for the debugging endpoint to come up.
            let mut attempts = 0;
            while !Self::is_running(&endpoint).await {
                attempts += 1;
                if attempts > 30 {
                    return Err(BrowserError::LaunchFailed(
                        "Chrome failed to start within timeout".to_string(),
                    ));
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        } else {
            info!("Chrome already running on port {}", config.debug_port);
        }

        let client = Arc::new(CdpClient::connect(&endpoint).await?);
        info!("Connected to Chrome at {}", endpoint);

        Ok(Self {
            client,
            process: RwLock::new(process),
            _profile_guard: profile_guard,
        })
    }

    async fn is_running(endpoint: &str) -> bool {
        reqwest::get(format!("{}/json/version", endpoint))
            .await
            .is_ok()
    }

    /// Kill Chrome if this backend launched it.
    pub async fn shutdown(&self) -> Result<(), BrowserError> {
        if let Some(mut child) = self.process.write().await.take() {
            info!("Shutting down Chrome");
            let _ = child.kill().await;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserBackend for ChromeBackend {
    async fn create_context(&self) -> Result<Box<dyn ContextHandle>, BrowserError> {
        let context_id = self.client.create_browser_context().await?;
        debug!("Created browser context {}", context_id);
        Ok(Box::new(ChromeContext {
            client: Arc::clone(&self.client),
            context_id,
        }))
    }
}

/// One isolated browser context inside the managed Chrome.
pub struct ChromeContext {
    client: Arc<CdpClient>,
    context_id: String,
}

#[async_trait]
impl ContextHandle for ChromeContext {
    fn id(&self) -> &str {
        &self.context_id
    }

    async fn open_page(&self) -> Result<Box<dyn PageDriver>, BrowserError> {
        let page = self.client.open_page(&self.context_id).await?;
        Ok(Box::new(page))
    }

    async fn is_healthy(&self) -> bool {
        match self.client.browser_context_ids().await {
            Ok(ids) => ids.iter().any(|id| id == &self.context_id),
            Err(e) => {
                warn!("Context {} health check failed: {}", self.context_id, e);
                false
            }
        }
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.client.dispose_browser_context(&self.context_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_endpoint() {
        let config = ChromeConfig::default();
        assert_eq!(config.endpoint(), "http://localhost:9222");
    }

    #[test]
    fn test_find_chrome_does_not_panic() {
        // May or may not find a browser depending on the machine.
        let _ = find_chrome();
    }
}
