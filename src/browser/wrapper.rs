//! Per-worker browser lifecycle
//!
//! Each worker session launches its own Chrome with an isolated profile
//! directory, so sessions never share cookies, caches or profile locks.

use anyhow::{Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::BrowserConfig;

/// Wrapper for Browser and its event handler task
///
/// Ensures handler is properly cleaned up when browser is dropped.
/// Handler MUST be aborted to prevent it running indefinitely after
/// browser is closed.
pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserWrapper {
    pub(crate) fn new(browser: Browser, handler: JoinHandle<()>, user_data_dir: PathBuf) -> Self {
        Self {
            browser,
            handler,
            user_data_dir: Some(user_data_dir),
        }
    }

    pub(crate) fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Close the browser, wait for the process to exit, then remove the profile
    ///
    /// `close()` alone leaves a zombie Chrome; `wait()` must follow before the
    /// profile directory can be removed (Windows keeps it locked until exit).
    /// Errors are logged, never returned: teardown is best-effort.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            tracing::warn!("Failed to wait for browser exit: {}", e);
        }
        self.handler.abort();
        self.cleanup_temp_dir();
    }

    /// Remove the profile directory (blocking)
    ///
    /// Uses `std::fs` because this may run from `Drop`.
    pub fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            info!("Cleaning up profile directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                tracing::warn!(
                    "Failed to clean up profile directory {}: {}. Manual cleanup may be required.",
                    path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();

        if let Some(path) = &self.user_data_dir {
            tracing::warn!(
                "BrowserWrapper dropped without shutdown(). Profile directory will be orphaned: {}",
                path.display()
            );
        }
    }
}

/// Launch a browser for one worker
///
/// The profile directory name carries the worker id, the process id and a
/// random suffix, so a restarted session never collides with a profile
/// that the previous Chrome has not yet released.
pub async fn launch_worker_browser(
    worker_id: &str,
    config: &BrowserConfig,
    request_timeout: Duration,
) -> Result<BrowserWrapper> {
    info!("Launching browser for worker {}", worker_id);

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let user_data_dir = std::env::temp_dir().join(format!(
        "jewel_scraper_{}_{}_{}",
        worker_id,
        std::process::id(),
        &suffix[..8]
    ));

    let (browser, handler) =
        crate::browser_setup::launch_browser(config, user_data_dir.clone(), request_timeout)
            .await?;

    Ok(BrowserWrapper::new(browser, handler, user_data_dir))
}

/// Create the single working page for a worker
pub async fn create_blank_page(wrapper: &BrowserWrapper) -> Result<Page> {
    let page = wrapper
        .browser()
        .new_page("about:blank")
        .await
        .context("Failed to create blank page")?;

    Ok(page)
}
