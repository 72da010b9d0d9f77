//! Concurrency orchestrator
//!
//! A fixed pool of worker tasks, each owning one [`WorkerSession`], pulls
//! pending items from a shared queue and runs the retry loop on each.
//! Outcomes stream back over a channel in completion order. One item's
//! failure, or even a panic, never stops the pool.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ScrapeConfig;
use crate::browser::DriverFactory;
use crate::item::WorkItem;
use crate::ledger::Ledger;
use crate::retry::{RetryPolicy, panic_message, process_item};
use crate::session::{SessionSettings, WorkerSession};
use crate::sink::RecordSink;
use crate::task::TaskExecutor;

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_input: usize,
    /// Already completed by an earlier run
    pub skipped: usize,
    pub pending: usize,
    pub succeeded: usize,
    /// Exhausted retries or panicked
    pub failed: usize,
    /// Dispatched but abandoned on cancellation
    pub interrupted: usize,
    /// Still queued when the pool stopped
    pub not_dispatched: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Succeeded,
    Failed,
    Interrupted,
}

pub struct Orchestrator {
    config: Arc<ScrapeConfig>,
    factory: Arc<dyn DriverFactory>,
    executor: Arc<dyn TaskExecutor>,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ScrapeConfig>,
        factory: Arc<dyn DriverFactory>,
        executor: Arc<dyn TaskExecutor>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            config,
            factory,
            executor,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one wired to Ctrl-C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process every item not already done according to `ledger`
    pub async fn run(&self, items: Vec<WorkItem>, ledger: &Ledger) -> RunSummary {
        let total_input = items.len();
        let (pending, skipped) = ledger.partition(items);
        let mut summary = RunSummary {
            total_input,
            skipped: skipped.len(),
            pending: pending.len(),
            ..RunSummary::default()
        };

        if summary.skipped > 0 {
            info!(
                "Skipping {} item(s) already completed in earlier runs",
                summary.skipped
            );
        }
        if pending.is_empty() {
            info!("Nothing to process");
            summary.cancelled = self.cancel.is_cancelled();
            return summary;
        }

        let workers = self.config.pool_size.clamp(1, pending.len());
        info!(
            "Processing {} item(s) with {} worker(s)",
            summary.pending, workers
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(pending)));
        let settings = Arc::new(SessionSettings::from_config(&self.config));
        let policy = Arc::new(RetryPolicy::from_config(&self.config));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut join_set = JoinSet::new();
        for n in 1..=workers {
            let worker = Worker {
                id: format!("worker-{n}"),
                queue: Arc::clone(&queue),
                factory: Arc::clone(&self.factory),
                executor: Arc::clone(&self.executor),
                sink: Arc::clone(&self.sink),
                settings: Arc::clone(&settings),
                policy: Arc::clone(&policy),
                cancel: self.cancel.clone(),
                outcomes: tx.clone(),
            };
            join_set.spawn(worker.run());
        }
        drop(tx);

        let mut completed = 0usize;
        while let Some(outcome) = rx.recv().await {
            match outcome {
                ItemOutcome::Succeeded => summary.succeeded += 1,
                ItemOutcome::Failed => summary.failed += 1,
                ItemOutcome::Interrupted => {
                    summary.interrupted += 1;
                    continue;
                }
            }
            completed += 1;
            info!("Progress: {}/{}", completed, summary.pending);
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }

        summary.not_dispatched = queue.lock().await.len();
        summary.cancelled = self.cancel.is_cancelled();
        if summary.not_dispatched > 0 && !summary.cancelled {
            warn!(
                "{} item(s) were never dispatched (no worker could start a browser)",
                summary.not_dispatched
            );
        }
        summary
    }
}

/// One pool slot: owns its session for the whole run
struct Worker {
    id: String,
    queue: Arc<Mutex<VecDeque<WorkItem>>>,
    factory: Arc<dyn DriverFactory>,
    executor: Arc<dyn TaskExecutor>,
    sink: Arc<dyn RecordSink>,
    settings: Arc<SessionSettings>,
    policy: Arc<RetryPolicy>,
    cancel: CancellationToken,
    outcomes: mpsc::UnboundedSender<ItemOutcome>,
}

impl Worker {
    async fn run(self) {
        let created = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            created = WorkerSession::create(
                self.id.clone(),
                Arc::clone(&self.factory),
                Arc::clone(&self.settings),
                self.cancel.clone(),
            ) => created,
        };
        let mut session = match created {
            Ok(session) => session,
            Err(e) => {
                error!(worker = %self.id, "Could not start browser session: {}", e);
                return;
            }
        };

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(item) = self.queue.lock().await.pop_front() else {
                break;
            };

            let result = AssertUnwindSafe(process_item(
                &mut session,
                &item,
                self.executor.as_ref(),
                self.sink.as_ref(),
                &self.policy,
            ))
            .catch_unwind()
            .await;

            let outcome = match result {
                Ok(Ok(record)) if record.is_success() => ItemOutcome::Succeeded,
                Ok(Ok(record)) => {
                    warn!(
                        worker = %self.id,
                        "Item {} failed after {} attempt(s): {}",
                        item.key,
                        record.attempt,
                        record.error_reason.as_deref().unwrap_or("unknown error")
                    );
                    ItemOutcome::Failed
                }
                Ok(Err(_)) => {
                    info!(worker = %self.id, "Interrupted while processing {}", item.key);
                    ItemOutcome::Interrupted
                }
                Err(panic) => {
                    error!(
                        worker = %self.id,
                        "Processing {} panicked: {}",
                        item.key,
                        panic_message(panic.as_ref())
                    );
                    session.restart().await;
                    ItemOutcome::Failed
                }
            };

            if self.outcomes.send(outcome).is_err() {
                break;
            }
        }

        session.close().await;
        info!(worker = %self.id, "Worker stopped");
    }
}
