//! Per-item retry loop
//!
//! One attempt runs navigate -> validate -> execute. Every attempt that
//! reaches an outcome is persisted as exactly one record, success or error.
//! Navigation failures feed the session's failure streak, which triggers a
//! browser restart at the configured threshold. Both failure kinds back off
//! and retry under the same policy.
//!
//! Cancellation is checked before each attempt, raced against the attempt
//! body and the backoff sleep, and returned as `Err(ScrapeError::Cancelled)`.
//! An attempt interrupted that way is abandoned without a record.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::Local;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::ScrapeConfig;
use crate::item::WorkItem;
use crate::record::{AttemptRecord, AttemptStatus, OutputFields};
use crate::session::{NavigationOutcome, WorkerSession};
use crate::sink::RecordSink;
use crate::task::TaskExecutor;
use crate::utils::{ScrapeError, backoff, sleep_or_cancel};

/// Pause between sink write retries
const SINK_RETRY_PAUSE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub unlimited: bool,
    /// Only consulted when `unlimited` is false
    pub max_attempts: u32,
    pub restart_after_failures: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub sink_write_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &ScrapeConfig) -> Self {
        Self {
            unlimited: config.unlimited_retry,
            max_attempts: config.max_attempts,
            restart_after_failures: config.restart_after_failures,
            backoff_base: config.backoff_base(),
            backoff_cap: config.backoff_cap(),
            sink_write_retries: config.sink_write_retries,
        }
    }

    /// True once `attempt` was the last one allowed
    pub fn exhausted(&self, attempt: u32) -> bool {
        !self.unlimited && attempt >= self.max_attempts
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff(attempt, self.backoff_base, self.backoff_cap)
    }
}

/// Drive one item until it succeeds, exhausts its attempts, or is cancelled
///
/// Returns the terminal record: the success, or the last error record when a
/// bounded policy runs out. The only `Err` is [`ScrapeError::Cancelled`].
pub async fn process_item(
    session: &mut WorkerSession,
    item: &WorkItem,
    executor: &dyn TaskExecutor,
    sink: &dyn RecordSink,
    policy: &RetryPolicy,
) -> Result<AttemptRecord, ScrapeError> {
    let cancel = session.cancellation_token().clone();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }
        attempt += 1;
        info!(
            worker = %session.worker_id(),
            attempt,
            "Processing item {}: {}",
            item.index + 1,
            item.key
        );

        let mut fields = OutputFields::new();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            result = run_attempt(session, item, executor, attempt, &mut fields) => result,
        };

        let error = match outcome {
            Ok(()) => None,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => Some(e),
        };

        if let Some(e) = &error {
            let tag = match e {
                ScrapeError::Navigation(_) => "nav_fail",
                _ => "error_page",
            };
            session.screenshot(tag, item.index, attempt).await;
        }

        let record = AttemptRecord {
            key: item.key.clone(),
            item_index: item.index,
            status: if error.is_none() {
                AttemptStatus::Success
            } else {
                AttemptStatus::Error
            },
            error_reason: error.as_ref().map(ToString::to_string),
            attempt,
            timestamp: Local::now(),
            worker: session.worker_id().to_string(),
            fields,
        };
        persist(sink, &record, policy.sink_write_retries).await;

        let Some(error) = error else {
            info!(
                worker = %session.worker_id(),
                attempt,
                "Success: {}",
                item.key
            );
            return Ok(record);
        };

        warn!(
            worker = %session.worker_id(),
            attempt,
            "Attempt failed for {}: {}",
            item.key,
            error
        );

        if matches!(error, ScrapeError::Navigation(_)) {
            let streak = session.record_navigation_failure();
            if streak >= policy.restart_after_failures {
                session.restart().await;
            }
        }

        if policy.exhausted(attempt) {
            warn!(
                worker = %session.worker_id(),
                "Giving up on {} after {} attempt(s)",
                item.key,
                attempt
            );
            return Ok(record);
        }

        let delay = policy.backoff(attempt);
        debug!("Backing off {:.1}s before retry", delay.as_secs_f64());
        sleep_or_cancel(delay, &cancel).await?;
    }
}

async fn run_attempt(
    session: &mut WorkerSession,
    item: &WorkItem,
    executor: &dyn TaskExecutor,
    attempt: u32,
    fields: &mut OutputFields,
) -> Result<(), ScrapeError> {
    session.jitter().await?;

    if session.navigate(&item.key).await? == NavigationOutcome::TimedOut {
        debug!("Validating page after navigation timeout");
    }
    session.validate_page().await?;
    session.record_navigation_success();

    // A panicking executor is an ordinary failed attempt
    match AssertUnwindSafe(executor.execute(session, item, attempt, fields))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(ScrapeError::Execution(format!(
            "executor panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Append with retries; a record that still fails is logged and dropped so
/// the worker keeps going
async fn persist(sink: &dyn RecordSink, record: &AttemptRecord, retries: u32) {
    let tries = retries.max(1);
    for n in 1..=tries {
        match sink.append(record) {
            Ok(()) => return,
            Err(e) if n < tries => {
                warn!(
                    "Persist failed for {} attempt {} (try {}/{}): {}",
                    record.key, record.attempt, n, tries, e
                );
                tokio::time::sleep(SINK_RETRY_PAUSE).await;
            }
            Err(e) => error!(
                "{}",
                ScrapeError::Persistence(format!(
                    "record for {} attempt {} lost after {} tries: {}",
                    record.key, record.attempt, tries, e
                ))
            ),
        }
    }
}
