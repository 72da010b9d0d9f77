//! Append-only record sinks
//!
//! One row per attempt. All workers share one sink; every append is
//! serialized behind a mutex so rows never interleave.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ledger::STATUS_COLUMN;
use crate::record::AttemptRecord;

/// Trailing column holding output fields that have no declared column
pub const EXTRA_FIELDS_COLUMN: &str = "extra_fields";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to encode extra fields: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for attempt records
pub trait RecordSink: Send + Sync {
    fn append(&self, record: &AttemptRecord) -> Result<(), SinkError>;
}

/// CSV file sink
///
/// The destination (and its parent directory) is created on first append,
/// and the header is written only if the file is new or empty. An existing
/// file with a different header is appended to with a warning.
pub struct CsvSink {
    path: PathBuf,
    run_id: String,
    header: Vec<String>,
    output_columns: Vec<String>,
    writer: Mutex<Option<csv::Writer<File>>>,
}

impl CsvSink {
    pub fn new(
        path: impl Into<PathBuf>,
        key_column: &str,
        output_columns: &[String],
        run_id: impl Into<String>,
    ) -> Self {
        let mut header: Vec<String> = [
            "run_id",
            key_column,
            STATUS_COLUMN,
            "error_reason",
            "attempt",
            "timestamp",
            "worker",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut columns = Vec::new();
        for column in output_columns {
            if header.contains(column) || columns.contains(column) || column == EXTRA_FIELDS_COLUMN
            {
                warn!("Output column '{}' clashes with a reserved or repeated column, ignoring", column);
                continue;
            }
            columns.push(column.clone());
        }
        header.extend(columns.iter().cloned());
        header.push(EXTRA_FIELDS_COLUMN.to_string());

        Self {
            path: path.into(),
            run_id: run_id.into(),
            header,
            output_columns: columns,
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn open(&self) -> Result<csv::Writer<File>, SinkError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let is_new = file.metadata().map_err(|e| self.io_error(e))?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(&self.header)?;
            writer.flush().map_err(|e| self.io_error(e))?;
            debug!("Created output {}", self.path.display());
        } else {
            self.check_existing_header();
        }
        Ok(writer)
    }

    fn check_existing_header(&self) {
        let Ok(file) = File::open(&self.path) else {
            return;
        };
        let mut first_line = String::new();
        if BufReader::new(file).read_line(&mut first_line).is_err() {
            return;
        }
        let existing: Vec<String> = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(first_line.as_bytes())
            .records()
            .next()
            .and_then(Result::ok)
            .map(|r| r.iter().map(|s| s.trim_start_matches('\u{feff}').to_string()).collect())
            .unwrap_or_default();

        if existing != self.header {
            warn!(
                "Existing output {} has a different header; appending anyway (expected: {})",
                self.path.display(),
                self.header.join(",")
            );
        }
    }

    fn row(&self, record: &AttemptRecord) -> Result<Vec<String>, SinkError> {
        let mut row = Vec::with_capacity(self.header.len());
        row.push(self.run_id.clone());
        row.push(record.key.clone());
        row.push(record.status.to_string());
        row.push(record.error_reason.clone().unwrap_or_default());
        row.push(record.attempt.to_string());
        row.push(record.timestamp.to_rfc3339());
        row.push(record.worker.clone());

        for column in &self.output_columns {
            row.push(record.fields.get(column).cloned().unwrap_or_default());
        }

        let extra: std::collections::BTreeMap<&String, &String> = record
            .fields
            .iter()
            .filter(|(name, _)| !self.output_columns.contains(name))
            .collect();
        row.push(if extra.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&extra)?
        });
        Ok(row)
    }
}

impl RecordSink for CsvSink {
    fn append(&self, record: &AttemptRecord) -> Result<(), SinkError> {
        let row = self.row(record)?;
        let mut guard = self.writer.lock();

        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };

        let result = writer
            .write_record(&row)
            .map_err(SinkError::from)
            .and_then(|()| writer.flush().map_err(|e| self.io_error(e)));

        if result.is_err() {
            // Reopen on the next append rather than reuse a writer in an unknown state
            *guard = None;
        }
        result
    }
}

/// In-memory sink, useful for dry runs and tests
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, key: &str) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.key == key)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordSink for MemorySink {
    fn append(&self, record: &AttemptRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
