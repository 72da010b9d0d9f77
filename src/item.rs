//! Work items and input loading

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// One unit of work: a key (the product URL) plus the input attributes the
/// task executor needs. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Position in the input file, used in diagnostics file names
    pub index: usize,
    pub key: String,
    pub attributes: BTreeMap<String, String>,
}

impl WorkItem {
    pub fn new(index: usize, key: impl Into<String>) -> Self {
        Self {
            index,
            key: key.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Attribute value, or `""` when the column is absent
    pub fn attribute(&self, name: &str) -> &str {
        self.attributes.get(name).map(String::as_str).unwrap_or("")
    }
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Failed to open input {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed input CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Input has no '{0}' column")]
    MissingKeyColumn(String),
}

/// Load work items from a CSV file with a header row
pub fn load_work_items(path: &Path, key_column: &str) -> Result<Vec<WorkItem>, InputError> {
    let file = std::fs::File::open(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_work_items(file, key_column)
}

/// Parse work items from any CSV reader
///
/// Every column other than `key_column` becomes an attribute. Keys are
/// trimmed and rows with an empty key are skipped.
pub fn read_work_items<R: Read>(reader: R, key_column: &str) -> Result<Vec<WorkItem>, InputError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let key_idx = headers
        .iter()
        .position(|h| h == key_column)
        .ok_or_else(|| InputError::MissingKeyColumn(key_column.to_string()))?;

    let mut items = Vec::new();
    for (row, result) in csv_reader.records().enumerate() {
        let record = result?;
        let key = record.get(key_idx).unwrap_or("").trim();
        if key.is_empty() {
            warn!(row = row + 1, "Skipping input row with empty '{}'", key_column);
            continue;
        }

        let attributes = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(i, _)| *i != key_idx)
            .map(|(_, (name, value))| (name.clone(), value.trim().to_string()))
            .collect();

        items.push(WorkItem {
            index: items.len(),
            key: key.to_string(),
            attributes,
        });
    }

    Ok(items)
}
