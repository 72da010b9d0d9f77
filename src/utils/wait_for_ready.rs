//! DOM readiness polling
//!
//! A page is ready once `document.readyState` is `complete` AND the body
//! carries more than a minimum amount of visible text. Both are required:
//! interstitials and error shells often finish loading with an empty body.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{ScrapeError, sleep_or_cancel};
use crate::browser::PageDriver;

/// Poll the page at a fixed interval until it is ready or `timeout` elapses
///
/// Each poll is itself bounded by the time left, so a driver call that never
/// returns still ends in a timeout failure. Driver errors during polling are
/// remembered and reported if the window closes without the page becoming
/// ready.
pub async fn wait_for_ready(
    driver: &mut dyn PageDriver,
    min_visible_text: usize,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), ScrapeError> {
    let start = Instant::now();
    let mut last_error = None;

    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        match tokio::time::timeout(remaining, driver.readiness()).await {
            Ok(Ok(readiness)) if readiness.is_ready(min_visible_text) => return Ok(()),
            Ok(Ok(readiness)) => {
                tracing::trace!(
                    ready_state = %readiness.ready_state,
                    visible_text = readiness.visible_text_len,
                    "Page not ready yet"
                );
            }
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => tracing::debug!("Readiness check did not return before the deadline"),
        }

        if start.elapsed() >= timeout {
            return Err(match last_error {
                Some(e) => ScrapeError::navigation(e),
                None => ScrapeError::Navigation(format!(
                    "DOM not ready after {}ms",
                    timeout.as_millis()
                )),
            });
        }

        sleep_or_cancel(poll_interval, cancel).await?;
    }
}
