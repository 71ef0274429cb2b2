// spider_chrome re-exports chromiumoxide API
use super::driver::PageDriver;
use super::locator::Locator;
use crate::error::{BrowserError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ChromeDriver {
    browser: Browser,
    temp_dir: Option<PathBuf>,
}

/// Connection mode for Chrome browser
pub enum ConnectionMode {
    /// Sandboxed mode - launches Chrome using system installation
    Sandboxed {
        chrome_path: Option<String>,
        no_sandbox: bool,
        headless: bool,
    },
    /// Advanced mode - connects to existing Chrome on debug port
    DebugPort(u16),
}

impl ChromeDriver {
    /// Current page, excluding Chrome's own chrome:// pages
    async fn get_active_page(&self) -> Result<Page> {
        let pages = self.browser.pages().await?;

        for page in pages.iter() {
            if let Ok(Some(url)) = page.url().await {
                if !url.starts_with("chrome://") {
                    return Ok(page.clone());
                }
            }
        }

        if let Some(page) = pages.last() {
            return Ok(page.clone());
        }

        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to create page: {}", e)))
    }

    /// Launch with auto-detection for CI environments
    pub async fn launch_auto(chrome_path: Option<String>) -> Result<Self> {
        let is_ci = crate::config::is_ci();

        Self::new(ConnectionMode::Sandboxed {
            chrome_path,
            no_sandbox: is_ci,
            headless: is_ci,
        })
        .await
    }

    /// Connect to existing Chrome on debug port (advanced mode)
    pub async fn connect_debug_port(port: u16) -> Result<Self> {
        Self::new(ConnectionMode::DebugPort(port)).await
    }

    /// Create new ChromeDriver with specified connection mode
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        let (browser, temp_dir) = match mode {
            ConnectionMode::Sandboxed {
                chrome_path,
                no_sandbox,
                headless,
            } => {
                // One profile directory per session so journeys never share cookies or carts
                let unique_id = chrono::Utc::now()
                    .timestamp_nanos_opt()
                    .unwrap_or_default();
                let temp_dir =
                    std::env::temp_dir().join(format!("storefront-e2e-{}", unique_id));
                std::fs::create_dir_all(&temp_dir).map_err(|e| {
                    BrowserError::LaunchFailed(format!("Failed to create temp directory: {}", e))
                })?;

                let mut config = if headless {
                    BrowserConfig::builder()
                } else {
                    BrowserConfig::builder().with_head()
                };

                config = config
                    .user_data_dir(&temp_dir)
                    .window_size(1440, 900)
                    .arg("--disable-notifications");

                if no_sandbox {
                    config = config.arg("--no-sandbox");
                }

                if let Some(path) = chrome_path {
                    config = config.chrome_executable(path);
                }

                let config = config.build().map_err(|e| {
                    BrowserError::LaunchFailed(format!(
                        "{}. Install Chrome/Chromium or pass --chrome-path; \
                         on Linux CI try --no-sandbox",
                        e
                    ))
                })?;

                let (browser, mut handler) = Browser::launch(config)
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Drive the CDP connection
                    }
                });

                (browser, Some(temp_dir))
            }
            ConnectionMode::DebugPort(port) => {
                let url = format!("http://localhost:{}", port);
                let (browser, mut handler) = Browser::connect(&url).await.map_err(|e| {
                    BrowserError::ConnectionFailed(format!(
                        "Failed to connect to Chrome on port {}. \
                             Make sure Chrome is running with --remote-debugging-port={}: {}",
                        port, port, e
                    ))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Drive the CDP connection
                    }
                });

                (browser, None)
            }
        };

        Ok(Self { browser, temp_dir })
    }

    /// Navigate to a URL and wait for the load event
    pub async fn navigate(&self, url: &str) -> Result<()> {
        use chromiumoxide::cdp::browser_protocol::page::{EventLoadEventFired, NavigateParams};

        let normalized_url = normalize_url(url);
        log::debug!("Navigating to {}", normalized_url);

        let page = self.get_active_page().await?;

        // Subscribe before navigating so a fast load event is not missed
        let mut load_events = page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        let params = NavigateParams::builder()
            .url(&normalized_url)
            .build()
            .map_err(|e| {
                BrowserError::NavigationFailed(format!("Invalid URL {}: {}", normalized_url, e))
            })?;

        let response = page.execute(params).await.map_err(|e| {
            let error_str = e.to_string();
            if error_str.contains("oneshot canceled") {
                BrowserError::NavigationFailed(
                    "Browser connection lost. The browser may have been closed or crashed."
                        .to_string(),
                )
            } else {
                BrowserError::NavigationFailed(format!(
                    "Failed to navigate to {}: {}",
                    normalized_url, e
                ))
            }
        })?;

        if let Some(error_text) = &response.result.error_text {
            return Err(BrowserError::NavigationFailed(format!(
                "Navigation error: {}",
                error_text
            )));
        }

        match tokio::time::timeout(LOAD_TIMEOUT, load_events.next()).await {
            Ok(Some(_)) => {
                log::debug!("Load event fired for {}", normalized_url);
                Ok(())
            }
            Ok(None) => {
                log::warn!("Load event stream closed for {}", normalized_url);
                Ok(())
            }
            Err(_) => Err(BrowserError::NavigationFailed(format!(
                "Timed out after {}s waiting for {} to load",
                LOAD_TIMEOUT.as_secs(),
                normalized_url
            ))),
        }
    }

    /// Execute JavaScript and return a specific type
    pub async fn execute_script_typed<T: serde::de::DeserializeOwned>(
        &self,
        script: &str,
    ) -> Result<T> {
        let page = self.get_active_page().await?;

        let result = page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Other(format!("Script execution failed: {}", e)))?;

        result
            .into_value()
            .map_err(|e| BrowserError::Other(format!("Failed to deserialize result: {}", e)))
    }

    /// Close the browser connection
    pub async fn close(mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| BrowserError::Other(e.to_string()))?;
        Ok(())
    }

    /// Run a JS snippet against the located element; the snippet sees it as `el`
    /// and must return a boolean. `false` or a missing element is reported as not found.
    async fn with_element(&self, locator: &Locator, body: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const el = {}; if (!el) return false; {} }})()",
            locator.js_lookup(),
            body
        );
        let found: bool = self.execute_script_typed(&script).await?;
        if found {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(locator.to_string()))
        }
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn goto(&self, url: &str) -> Result<()> {
        self.navigate(url).await
    }

    async fn is_ready(&self, locator: &Locator) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const el = {};
                if (!el) return false;
                const rect = el.getBoundingClientRect();
                const style = window.getComputedStyle(el);
                return rect.width > 0 && rect.height > 0
                    && style.visibility !== 'hidden'
                    && style.display !== 'none'
                    && !el.disabled
                    && el.getAttribute('aria-disabled') !== 'true';
            }})()"#,
            locator.js_lookup()
        );
        self.execute_script_typed(&script).await
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        match locator {
            Locator::Css(selector) => {
                let page = self.get_active_page().await?;
                let element = page
                    .find_element(selector.as_str())
                    .await
                    .map_err(|_| BrowserError::ElementNotFound(locator.to_string()))?;
                element.scroll_into_view().await.map_err(|e| {
                    BrowserError::NotInteractable(format!("{}: {}", locator, e))
                })?;
                element.click().await.map_err(|e| {
                    BrowserError::NotInteractable(format!("{}: {}", locator, e))
                })?;
                Ok(())
            }
            Locator::Text(_) => {
                self.with_element(
                    locator,
                    "el.scrollIntoView({block: 'center'}); el.click(); return true;",
                )
                .await
            }
        }
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<()> {
        // Clear and focus first, then type so the site's key handlers run
        self.with_element(
            locator,
            "el.focus(); if ('value' in el) { el.value = ''; \
             el.dispatchEvent(new Event('input', {bubbles: true})); } return true;",
        )
        .await?;

        match locator {
            Locator::Css(selector) => {
                let page = self.get_active_page().await?;
                let element = page
                    .find_element(selector.as_str())
                    .await
                    .map_err(|_| BrowserError::ElementNotFound(locator.to_string()))?;
                element.type_str(value).await.map_err(|e| {
                    BrowserError::NotInteractable(format!("{}: {}", locator, e))
                })?;
                Ok(())
            }
            Locator::Text(_) => {
                let body = format!(
                    "el.value = {}; el.dispatchEvent(new Event('input', {{bubbles: true}})); \
                     el.dispatchEvent(new Event('change', {{bubbles: true}})); return true;",
                    serde_json::Value::String(value.to_string())
                );
                self.with_element(locator, &body).await
            }
        }
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let page = self.get_active_page().await?;
        let target = match page.find_element(":focus").await {
            Ok(element) => element,
            Err(_) => page
                .find_element("body")
                .await
                .map_err(|_| BrowserError::ElementNotFound("body".to_string()))?,
        };
        target
            .press_key(key)
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to press {}: {}", key, e)))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let page = self.get_active_page().await?;

        page.url()
            .await
            .map_err(|e| BrowserError::Other(e.to_string()))?
            .ok_or(BrowserError::NoPage)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let page = self.get_active_page().await?;

        page.screenshot(chromiumoxide::page::ScreenshotParams::default())
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to take screenshot: {}", e)))
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        if let Some(temp_dir) = &self.temp_dir {
            if temp_dir.exists() {
                let _ = std::fs::remove_dir_all(temp_dir);
            }
        }
    }
}

/// Add https:// when no scheme is given
pub fn normalize_url(url: &str) -> String {
    const SCHEMES: [&str; 5] = ["http://", "https://", "file://", "about:", "data:"];
    if SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}
