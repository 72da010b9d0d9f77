//! Resume ledger: keys already completed by earlier runs
//!
//! Rebuilt at startup from the previous output file and read-only afterwards.
//! The sink, not the ledger, records new successes.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::item::WorkItem;
use crate::record::AttemptStatus;

/// Column the sink writes attempt status into
pub const STATUS_COLUMN: &str = "status";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed prior output: {0}")]
    Csv(#[from] csv::Error),

    #[error("Prior output has no '{0}' column")]
    MissingColumn(String),
}

/// How prior rows decide whether a key is done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Done if any row for the key has status `success`
    #[default]
    AnySuccess,
    /// Done only if the key's last row in file order is `success`
    LatestRow,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    done: HashSet<String>,
}

impl Ledger {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load done keys from prior output; never fails
    pub fn load(path: &Path, key_column: &str, policy: ResumePolicy) -> Self {
        let done = load_done_keys(path, key_column, policy);
        if !done.is_empty() {
            info!(
                "Resume: {} key(s) already completed in {}",
                done.len(),
                path.display()
            );
        }
        Self { done }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.done.contains(key)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Split items into `(pending, skipped)`, preserving input order
    pub fn partition(&self, items: Vec<WorkItem>) -> (Vec<WorkItem>, Vec<WorkItem>) {
        items.into_iter().partition(|item| !self.contains(&item.key))
    }
}

impl FromIterator<String> for Ledger {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            done: iter.into_iter().collect(),
        }
    }
}

/// Keys whose prior rows count as done under `policy`
///
/// A missing file yields the empty set. Unreadable or malformed output also
/// yields the empty set, with a warning.
pub fn load_done_keys(path: &Path, key_column: &str, policy: ResumePolicy) -> HashSet<String> {
    if !path.exists() {
        return HashSet::new();
    }

    let result = std::fs::File::open(path)
        .map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })
        .and_then(|file| read_done_keys(file, key_column, policy));

    match result {
        Ok(keys) => keys,
        Err(e) => {
            warn!(
                "Could not read prior output {} for resume, starting fresh: {}",
                path.display(),
                e
            );
            HashSet::new()
        }
    }
}

fn read_done_keys<R: Read>(
    reader: R,
    key_column: &str,
    policy: ResumePolicy,
) -> Result<HashSet<String>, LedgerError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == name)
            .ok_or_else(|| LedgerError::MissingColumn(name.to_string()))
    };
    let key_idx = column(key_column)?;
    let status_idx = column(STATUS_COLUMN)?;

    let mut latest: HashMap<String, bool> = HashMap::new();
    for result in csv_reader.records() {
        let record = result?;
        let (Some(key), Some(status)) = (record.get(key_idx), record.get(status_idx)) else {
            // Truncated row, typically an interrupted final write
            continue;
        };
        if key.is_empty() {
            continue;
        }
        let success = AttemptStatus::parse(status) == Some(AttemptStatus::Success);
        match policy {
            ResumePolicy::AnySuccess => {
                *latest.entry(key.to_string()).or_default() |= success;
            }
            ResumePolicy::LatestRow => {
                latest.insert(key.to_string(), success);
            }
        }
    }

    Ok(latest
        .into_iter()
        .filter_map(|(key, done)| done.then_some(key))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = "\
run_id,product_url,status,error_reason,attempt
r1,https://a.example/1,error,timeout,1
r1,https://a.example/1,success,,2
r1,https://a.example/2,success,,1
r1,https://a.example/2,error,boom,2
r1,https://a.example/3,error,boom,1
";

    fn keys(set: HashSet<String>) -> Vec<String> {
        let mut keys: Vec<_> = set.into_iter().collect();
        keys.sort();
        keys
    }

    #[test]
    fn any_success_counts_earlier_success() {
        let done = read_done_keys(OUTPUT.as_bytes(), "product_url", ResumePolicy::AnySuccess)
            .unwrap();
        assert_eq!(keys(done), vec!["https://a.example/1", "https://a.example/2"]);
    }

    #[test]
    fn latest_row_requires_final_success() {
        let done =
            read_done_keys(OUTPUT.as_bytes(), "product_url", ResumePolicy::LatestRow).unwrap();
        assert_eq!(keys(done), vec!["https://a.example/1"]);
    }

    #[test]
    fn truncated_trailing_row_is_skipped() {
        let data = format!("{OUTPUT}r1,https://a.example/4");
        let done =
            read_done_keys(data.as_bytes(), "product_url", ResumePolicy::AnySuccess).unwrap();
        assert_eq!(done.len(), 2);
    }

    #[test]
    fn missing_status_column_is_an_error() {
        let data = "product_url,attempt\nhttps://a.example/1,1\n";
        let err = read_done_keys(data.as_bytes(), "product_url", ResumePolicy::AnySuccess)
            .unwrap_err();
        assert!(matches!(err, LedgerError::MissingColumn(ref c) if c == STATUS_COLUMN));
    }

    #[test]
    fn unreadable_output_fails_soft() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, b"product_url,status\n\xff\xfe,success\n").unwrap();
        let err = read_done_keys(
            std::fs::File::open(&path).unwrap(),
            "product_url",
            ResumePolicy::AnySuccess,
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::Csv(_)));
        assert!(load_done_keys(&path, "product_url", ResumePolicy::AnySuccess).is_empty());

        let missing = dir.path().join("missing.csv");
        assert!(load_done_keys(&missing, "product_url", ResumePolicy::AnySuccess).is_empty());
    }

    #[test]
    fn partition_preserves_order() {
        let ledger: Ledger = ["b".to_string()].into_iter().collect();
        let items = vec![WorkItem::new(0, "a"), WorkItem::new(1, "b"), WorkItem::new(2, "c")];
        let (pending, skipped) = ledger.partition(items);
        assert_eq!(
            pending.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(skipped.len(), 1);
    }
}
