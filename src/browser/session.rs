use async_trait::async_trait;
use reqwest::Client;
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::browser::behavior::BehaviorSimulator;
use crate::browser::engine::{BrowserError, BrowsingContext, BrowsingEngine, Page, PageElement};
use crate::browser::fingerprint::{Fingerprint, FingerprintManager};
use crate::cli::config::BrowserSettings;

/// Browsing engine backed by a WebDriver server
///
/// Each context is a separate WebDriver session, which gives it a private
/// profile: cookies accepted or challenges passed in one task are invisible
/// to every other task.
pub struct WebDriverEngine {
    settings: BrowserSettings,
    fingerprint_manager: FingerprintManager,
    behavior_simulator: BehaviorSimulator,
    client: Client,
}

impl WebDriverEngine {
    pub fn new(settings: BrowserSettings) -> Result<Self, BrowserError> {
        let fingerprint_manager = FingerprintManager::new(&settings);
        let behavior_simulator = BehaviorSimulator::new(settings.behavior.clone());

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BrowserError::EngineUnavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            settings,
            fingerprint_manager,
            behavior_simulator,
            client,
        })
    }

    /// Query the WebDriver status endpoint
    async fn probe(&self) -> Result<(), BrowserError> {
        let endpoint = format!("{}/status", self.settings.webdriver_url.trim_end_matches('/'));

        let status = self.client.get(&endpoint)
            .send()
            .await
            .map_err(|e| BrowserError::EngineUnavailable(format!("{} unreachable: {}", endpoint, e)))?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| BrowserError::EngineUnavailable(format!("invalid status from {}: {}", endpoint, e)))?;

        let ready = status.pointer("/value/ready").and_then(|v| v.as_bool()).unwrap_or(true);
        if !ready {
            return Err(BrowserError::EngineUnavailable(format!("{} reports not ready", endpoint)));
        }

        Ok(())
    }

    fn capabilities(&self, fingerprint: &Fingerprint) -> WebDriverResult<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();

        caps.add_chrome_arg(&format!("--user-agent={}", fingerprint.user_agent))?;
        caps.add_chrome_arg(&format!("--lang={}", fingerprint.locale))?;
        caps.add_chrome_arg(&format!("--window-size={},{}", fingerprint.viewport.width, fingerprint.viewport.height))?;

        if self.settings.headless {
            caps.set_headless()?;
        }

        // Hide the usual automation tells
        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_option("excludeSwitches", serde_json::json!(["enable-automation"]))?;
        caps.add_chrome_option("useAutomationExtension", false)?;
        caps.add_chrome_option(
            "prefs",
            serde_json::json!({ "intl.accept_languages": fingerprint.accept_language }),
        )?;

        Ok(caps)
    }
}

#[async_trait]
impl BrowsingEngine for WebDriverEngine {
    async fn launch(&self) -> Result<(), BrowserError> {
        self.probe().await?;
        debug!("WebDriver ready at {}", self.settings.webdriver_url);
        Ok(())
    }

    async fn open_context(&self) -> Result<Box<dyn BrowsingContext>, BrowserError> {
        let fingerprint = self.fingerprint_manager.random_fingerprint()
            .map_err(|e| BrowserError::Context(e.to_string()))?;

        let caps = self.capabilities(&fingerprint)
            .map_err(|e| BrowserError::Context(format!("invalid capabilities: {}", e)))?;

        let driver = match WebDriver::new(&self.settings.webdriver_url, caps).await {
            Ok(driver) => driver,
            Err(e) => {
                // A dead server is environmental, a refused session is not
                self.probe().await?;
                return Err(BrowserError::Context(e.to_string()));
            }
        };

        debug!("Browsing context opened with user agent: {}", fingerprint.user_agent);

        Ok(Box::new(WebDriverContext {
            driver: Some(driver),
            behavior: self.behavior_simulator.clone(),
        }))
    }
}

/// One WebDriver session holding a single page
pub struct WebDriverContext {
    driver: Option<WebDriver>,
    behavior: BehaviorSimulator,
}

impl WebDriverContext {
    fn driver(&self) -> Result<&WebDriver, BrowserError> {
        self.driver.as_ref()
            .ok_or_else(|| BrowserError::Command("browsing context already closed".to_string()))
    }
}

#[async_trait]
impl Page for WebDriverContext {
    async fn content(&self) -> Result<String, BrowserError> {
        self.driver()?.source().await
            .map_err(|e| BrowserError::Command(format!("failed to get page source: {}", e)))
    }

    async fn title(&self) -> Result<String, BrowserError> {
        self.driver()?.title().await
            .map_err(|e| BrowserError::Command(format!("failed to get page title: {}", e)))
    }

    async fn find(&self, selector: &str) -> Result<Option<Box<dyn PageElement>>, BrowserError> {
        let elements = self.driver()?.find_all(By::Css(selector)).await
            .map_err(|e| BrowserError::Command(format!("lookup of {} failed: {}", selector, e)))?;

        for element in elements {
            if element.is_displayed().await.unwrap_or(false) {
                return Ok(Some(Box::new(WebDriverElement {
                    element,
                    behavior: self.behavior.clone(),
                })));
            }
        }

        Ok(None)
    }

    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
impl BrowsingContext for WebDriverContext {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        let driver = self.driver()?;

        if let Err(e) = driver.set_page_load_timeout(timeout).await {
            warn!("Failed to set page load timeout: {}", e);
        }

        debug!("Navigating to: {}", url);
        match tokio::time::timeout(timeout, driver.goto(url)).await {
            Ok(Ok(())) => Ok(()),
            Err(_) => Err(BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            }),
            Ok(Err(e)) if e.to_string().to_lowercase().contains("timeout") => Err(BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            }),
            Ok(Err(e)) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn close(mut self: Box<Self>) {
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                error!("Error closing browsing context: {}", e);
            }
            debug!("Browsing context closed");
        }
    }
}

impl Drop for WebDriverContext {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Reached when a timed-out task is abandoned mid-flight
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = driver.quit().await {
                        error!("Error closing browsing context during drop: {}", e);
                    }
                });
            }
        }
    }
}

struct WebDriverElement {
    element: WebElement,
    behavior: BehaviorSimulator,
}

#[async_trait]
impl PageElement for WebDriverElement {
    async fn activate(&self) -> Result<(), BrowserError> {
        self.behavior.click(&self.element).await
            .map_err(|e| BrowserError::Command(format!("click failed: {}", e)))
    }

    async fn fill(&self, text: &str) -> Result<(), BrowserError> {
        self.behavior.type_text(&self.element, text).await
            .map_err(|e| BrowserError::Command(format!("typing failed: {}", e)))
    }

    async fn capture(&self) -> Result<Vec<u8>, BrowserError> {
        self.element.screenshot_as_png().await
            .map_err(|e| BrowserError::Command(format!("element capture failed: {}", e)))
    }
}
