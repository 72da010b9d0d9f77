//! chromiumoxide-backed page driver

use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use chromiumoxide_cdp::cdp::browser_protocol::page::CaptureScreenshotFormat;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use super::scripts;
use super::wrapper::{BrowserWrapper, create_blank_page, launch_worker_browser};
use super::{BrowserError, BrowserResult, DriverFactory, PageDriver, ProductSignal, Readiness};
use crate::BrowserConfig;
use crate::utils::constants::{READINESS_SCRIPT, SCROLL_TOP_SCRIPT, STOP_LOADING_SCRIPT};

/// CDP requests get this much headroom over the navigation timeout, so the
/// session's own timeout fires first and the load can be stopped cleanly.
const REQUEST_TIMEOUT_HEADROOM: Duration = Duration::from_secs(5);

/// One Chrome instance with a single working page
pub struct ChromeDriver {
    wrapper: BrowserWrapper,
    page: Page,
    request_timeout: Duration,
}

impl ChromeDriver {
    async fn eval<T: DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?
            .into_value::<T>()
            .map_err(|e| BrowserError::Script(e.to_string()))
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        match self.page.goto(url).await {
            Ok(_) => Ok(()),
            Err(CdpError::Timeout) => Err(BrowserError::NavigationTimeout(self.request_timeout)),
            Err(e) => Err(BrowserError::NavigationFailed(format!("{url}: {e}"))),
        }
    }

    async fn stop_loading(&mut self) -> BrowserResult<()> {
        self.page
            .evaluate(STOP_LOADING_SCRIPT)
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn readiness(&mut self) -> BrowserResult<Readiness> {
        self.eval(READINESS_SCRIPT).await
    }

    async fn has_visible(&mut self, signal: &ProductSignal) -> BrowserResult<bool> {
        self.eval(&scripts::visible_signal(signal)).await
    }

    async fn screenshot(&mut self, path: &Path) -> BrowserResult<()> {
        // Diagnostics should show the top of the page, where errors render
        if let Err(e) = self.page.evaluate(SCROLL_TOP_SCRIPT).await {
            tracing::debug!("Scroll to top before screenshot failed: {}", e);
        }

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let image = self
            .page
            .screenshot(params)
            .await
            .map_err(|e| BrowserError::Script(format!("Page screenshot failed: {e}")))?;

        tokio::fs::write(path, image)
            .await
            .map_err(|e| BrowserError::IoError(format!("{}: {}", path.display(), e)))
    }

    async fn click_first(&mut self, css: &str) -> BrowserResult<bool> {
        self.eval(&scripts::click_first(css)).await
    }

    async fn inner_text(&mut self, css: &str) -> BrowserResult<Option<String>> {
        self.eval(&scripts::inner_text(css)).await
    }

    async fn click_matching(
        &mut self,
        css: &str,
        text: &str,
        exact: bool,
    ) -> BrowserResult<Option<String>> {
        self.eval(&scripts::click_matching(css, text, exact)).await
    }

    async fn evaluate(&mut self, script: &str) -> BrowserResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if let Err(e) = self.page.clone().close().await {
            tracing::debug!("Failed to close page: {}", e);
        }
        self.wrapper.shutdown().await;
        Ok(())
    }
}

/// Launches one [`ChromeDriver`] per worker (and per restart)
#[derive(Debug, Clone)]
pub struct ChromeDriverFactory {
    config: BrowserConfig,
    request_timeout: Duration,
}

impl ChromeDriverFactory {
    pub fn new(config: BrowserConfig, navigation_timeout: Duration) -> Self {
        Self {
            config,
            request_timeout: navigation_timeout + REQUEST_TIMEOUT_HEADROOM,
        }
    }
}

#[async_trait]
impl DriverFactory for ChromeDriverFactory {
    async fn launch(&self, worker_id: &str) -> BrowserResult<Box<dyn PageDriver>> {
        let mut wrapper = launch_worker_browser(worker_id, &self.config, self.request_timeout)
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("{e:#}")))?;

        let page = match create_blank_page(&wrapper).await {
            Ok(page) => page,
            Err(e) => {
                wrapper.shutdown().await;
                return Err(BrowserError::PageCreationFailed(format!("{e:#}")));
            }
        };

        Ok(Box::new(ChromeDriver {
            wrapper,
            page,
            request_timeout: self.request_timeout,
        }))
    }
}
