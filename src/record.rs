//! Attempt records written to the sink

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Output fields produced by a task executor, keyed by column name
pub type OutputFields = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Error,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Error => "error",
        }
    }

    /// Parse a status cell; surrounding whitespace and case are ignored
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Some(AttemptStatus::Success),
            "error" => Some(AttemptStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one attempt of one work item
///
/// `fields` may be partially populated on error.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub key: String,
    pub item_index: usize,
    pub status: AttemptStatus,
    pub error_reason: Option<String>,
    /// 1-based, strictly increasing per item
    pub attempt: u32,
    pub timestamp: DateTime<Local>,
    pub worker: String,
    pub fields: OutputFields,
}

impl AttemptRecord {
    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Success
    }
}
