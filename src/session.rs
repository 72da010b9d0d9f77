//! Worker session: one owned browser context plus its failure accounting
//!
//! # Lifecycle
//!
//! - [`WorkerSession::create`] launches the driver eagerly at worker start
//! - [`WorkerSession::restart`] tears the driver down (best-effort) and
//!   relaunches it, resetting the navigation failure counter
//! - [`WorkerSession::close`] is the final teardown
//!
//! A restart whose relaunch fails leaves the session without a driver; the
//! next call that needs one launches it (get-or-launch), so a transient
//! launch failure surfaces as an ordinary navigation failure.
//!
//! Sessions are single-owner: one worker task drives one session, so no
//! locking is needed around the driver.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::ScrapeConfig;
use crate::browser::{BrowserError, BrowserResult, DriverFactory, PageDriver, ProductSignal};
use crate::utils::{ScrapeError, jitter, sleep_or_cancel, wait_for_ready};

/// Upper bound on best-effort teardown and load-abort calls
const TEARDOWN_GRACE: Duration = Duration::from_secs(10);

/// Per-session timing and validation settings, shared by all workers
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub navigation_timeout: Duration,
    pub ready_timeout: Duration,
    pub ready_poll: Duration,
    pub min_visible_text: usize,
    pub settle: Duration,
    pub product_signals: Vec<ProductSignal>,
    pub screenshot_dir: PathBuf,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            navigation_timeout: config.navigation_timeout(),
            ready_timeout: config.ready_timeout(),
            ready_poll: config.ready_poll(),
            min_visible_text: config.min_visible_text,
            settle: config.settle(),
            product_signals: config.product_signals.clone(),
            screenshot_dir: config.screenshot_dir.clone(),
            jitter_min: config.jitter_min(),
            jitter_max: config.jitter_max(),
        }
    }
}

/// How a navigation ended when it did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    Loaded,
    /// The load was stopped at the timeout; whatever rendered is kept
    TimedOut,
}

pub struct WorkerSession {
    worker_id: String,
    factory: Arc<dyn DriverFactory>,
    driver: Option<Box<dyn PageDriver>>,
    settings: Arc<SessionSettings>,
    cancel: CancellationToken,
    consecutive_nav_failures: u32,
    generation: u32,
}

impl WorkerSession {
    /// Launch a session for `worker_id`
    pub async fn create(
        worker_id: impl Into<String>,
        factory: Arc<dyn DriverFactory>,
        settings: Arc<SessionSettings>,
        cancel: CancellationToken,
    ) -> BrowserResult<Self> {
        let mut session = Self {
            worker_id: worker_id.into(),
            factory,
            driver: None,
            settings,
            cancel,
            consecutive_nav_failures: 0,
            generation: 0,
        };
        session.launch().await?;
        Ok(session)
    }

    async fn launch(&mut self) -> BrowserResult<()> {
        let driver = self.factory.launch(&self.worker_id).await?;
        self.driver = Some(driver);
        self.generation += 1;
        info!(generation = self.generation, "Browser session ready");
        Ok(())
    }

    /// The live driver, launching one if a previous restart left none
    pub async fn driver(&mut self) -> BrowserResult<&mut (dyn PageDriver + 'static)> {
        if self.driver.is_none() {
            warn!("No live browser for {}, relaunching", self.worker_id);
            self.launch().await?;
        }
        self.driver
            .as_deref_mut()
            .ok_or_else(|| BrowserError::Unavailable(self.worker_id.clone()))
    }

    /// Discard the current driver and launch a replacement
    ///
    /// Always safe to call. Teardown errors are swallowed; a failed relaunch
    /// is logged and retried lazily by [`WorkerSession::driver`].
    pub async fn restart(&mut self) {
        info!(
            failures = self.consecutive_nav_failures,
            "Restarting browser session"
        );
        self.teardown().await;
        self.consecutive_nav_failures = 0;

        if let Err(e) = self.launch().await {
            warn!("Browser relaunch failed, will retry on next use: {}", e);
        }
    }

    /// Final teardown, best-effort
    pub async fn close(&mut self) {
        self.teardown().await;
        debug!("Browser session closed");
    }

    async fn teardown(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        match tokio::time::timeout(TEARDOWN_GRACE, driver.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Ignoring browser teardown error: {}", e),
            Err(_) => warn!(
                "Browser teardown exceeded {}s, abandoning it",
                TEARDOWN_GRACE.as_secs()
            ),
        }
    }

    /// Navigate to `url` under the configured hard timeout
    ///
    /// A timeout is soft: the in-flight load is stopped and the page is left
    /// for validation. Non-http(s) targets and driver errors are navigation
    /// failures.
    pub async fn navigate(&mut self, url: &str) -> Result<NavigationOutcome, ScrapeError> {
        let parsed = Url::parse(url)
            .map_err(|e| ScrapeError::Navigation(format!("invalid URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ScrapeError::Navigation(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let timeout = self.settings.navigation_timeout;
        let driver = self.driver().await.map_err(ScrapeError::navigation)?;

        match tokio::time::timeout(timeout, driver.goto(url)).await {
            Ok(Ok(())) => Ok(NavigationOutcome::Loaded),
            Ok(Err(BrowserError::NavigationTimeout(_))) | Err(_) => {
                warn!(
                    "Navigation exceeded {}s, stopping load and validating partial page",
                    timeout.as_secs()
                );
                match tokio::time::timeout(TEARDOWN_GRACE, driver.stop_loading()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("Stop loading failed: {}", e),
                    Err(_) => debug!("Stop loading did not return in time"),
                }
                Ok(NavigationOutcome::TimedOut)
            }
            Ok(Err(e)) => Err(ScrapeError::navigation(e)),
        }
    }

    /// Poll until the document is complete and carries visible text
    pub async fn wait_until_ready(&mut self) -> Result<(), ScrapeError> {
        let settings = Arc::clone(&self.settings);
        let cancel = self.cancel.clone();
        let driver = self.driver().await.map_err(ScrapeError::navigation)?;
        wait_for_ready(
            driver,
            settings.min_visible_text,
            settings.ready_timeout,
            settings.ready_poll,
            &cancel,
        )
        .await
    }

    /// True if any configured product signal is visible
    ///
    /// All checks together share the ready timeout. A signal whose check
    /// errors or outlives that budget counts as absent.
    pub async fn has_product_signal(&mut self) -> Result<bool, ScrapeError> {
        let settings = Arc::clone(&self.settings);
        let deadline = Instant::now() + settings.ready_timeout;
        let driver = self.driver().await.map_err(ScrapeError::navigation)?;
        for signal in &settings.product_signals {
            match tokio::time::timeout_at(deadline, driver.has_visible(signal)).await {
                Ok(Ok(true)) => return Ok(true),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => debug!(?signal, "Product signal check failed: {}", e),
                Err(_) => debug!(?signal, "Product signal check did not return in time"),
            }
        }
        Ok(false)
    }

    /// Ready check, settle pause, then product signal check
    pub async fn validate_page(&mut self) -> Result<(), ScrapeError> {
        self.wait_until_ready().await?;
        sleep_or_cancel(self.settings.settle, &self.cancel).await?;
        if !self.has_product_signal().await? {
            return Err(ScrapeError::Navigation(
                "No product signals found (possible error or interstitial page)".into(),
            ));
        }
        Ok(())
    }

    /// Capture a diagnostic screenshot; failures are logged, never raised
    ///
    /// Does not relaunch a missing driver.
    pub async fn screenshot(&mut self, tag: &str, index: usize, attempt: u32) -> Option<PathBuf> {
        let driver = self.driver.as_deref_mut()?;

        if let Err(e) = tokio::fs::create_dir_all(&self.settings.screenshot_dir).await {
            warn!(
                "Cannot create screenshot dir {}: {}",
                self.settings.screenshot_dir.display(),
                e
            );
            return None;
        }

        let name = screenshot_file_name(tag, &self.worker_id, index, attempt, Local::now());
        let path = self.settings.screenshot_dir.join(name);
        match driver.screenshot(&path).await {
            Ok(()) => {
                info!("Saved screenshot: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                None
            }
        }
    }

    /// Randomized pacing pause between interactions
    pub async fn jitter(&self) -> Result<(), ScrapeError> {
        jitter(self.settings.jitter_min, self.settings.jitter_max, &self.cancel).await
    }

    pub fn record_navigation_success(&mut self) {
        self.consecutive_nav_failures = 0;
    }

    /// Count a navigation failure and return the new streak length
    pub fn record_navigation_failure(&mut self) -> u32 {
        self.consecutive_nav_failures += 1;
        self.consecutive_nav_failures
    }

    pub fn consecutive_nav_failures(&self) -> u32 {
        self.consecutive_nav_failures
    }

    /// Number of drivers launched by this session so far
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// `{tag}_{worker}_{index+1:03}_try{attempt:02}_{YYYYmmdd_HHMMSS}.png`
pub fn screenshot_file_name(
    tag: &str,
    worker_id: &str,
    index: usize,
    attempt: u32,
    at: DateTime<Local>,
) -> String {
    format!(
        "{}_{}_{:03}_try{:02}_{}.png",
        tag,
        worker_id,
        index + 1,
        attempt,
        at.format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn screenshot_names_are_deterministic() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            screenshot_file_name("nav_fail", "worker-2", 0, 3, at),
            "nav_fail_worker-2_001_try03_20240309_140507.png"
        );
        assert_eq!(
            screenshot_file_name("error_page", "worker-1", 41, 12, at),
            "error_page_worker-1_042_try12_20240309_140507.png"
        );
    }

    #[test]
    fn sessions_can_cross_await_points_in_spawned_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WorkerSession>();
    }

    #[test]
    fn settings_follow_config() {
        let config = ScrapeConfig {
            settle_ms: 250,
            ready_poll_ms: 100,
            ..ScrapeConfig::default()
        };
        let settings = SessionSettings::from_config(&config);
        assert_eq!(settings.settle, Duration::from_millis(250));
        assert_eq!(settings.ready_poll, Duration::from_millis(100));
        assert_eq!(settings.navigation_timeout, Duration::from_secs(45));
        assert_eq!(settings.product_signals.len(), 3);
    }
}
