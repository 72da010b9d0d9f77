use thiserror::Error;

use crate::browser::BrowserError;

/// Failure kinds handled at the per-item retry boundary
///
/// Navigation and execution failures are recoverable and retried under the
/// same policy. `Cancelled` is control flow, never retried and never recorded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Cancelled by operator")]
    Cancelled,
}

impl ScrapeError {
    pub fn navigation(err: impl std::fmt::Display) -> Self {
        ScrapeError::Navigation(err.to_string())
    }

    pub fn execution(err: impl std::fmt::Display) -> Self {
        ScrapeError::Execution(err.to_string())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScrapeError::Cancelled)
    }
}

/// Driver errors raised inside a task executor are execution failures.
/// Navigation-phase callers map explicitly with [`ScrapeError::navigation`].
impl From<BrowserError> for ScrapeError {
    fn from(err: BrowserError) -> Self {
        ScrapeError::Execution(err.to_string())
    }
}
