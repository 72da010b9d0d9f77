//! Task executors: the site-specific work done once a page has validated

mod configured;

pub use configured::{ConfiguredExecutor, ExtractSpec, SelectionSpec, TaskSpec};

use async_trait::async_trait;

use crate::item::WorkItem;
use crate::record::OutputFields;
use crate::session::WorkerSession;
use crate::utils::ScrapeError;

/// Performs one attempt of site-specific selection and extraction
///
/// Fields are written into the caller-owned `output` as they are gathered,
/// so whatever was collected before a failure is still persisted with the
/// error record. One call is one attempt; retries happen outside.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Columns this executor fills, in output order
    fn output_columns(&self) -> Vec<String>;

    async fn execute(
        &self,
        session: &mut WorkerSession,
        item: &WorkItem,
        attempt: u32,
        output: &mut OutputFields,
    ) -> Result<(), ScrapeError>;
}
