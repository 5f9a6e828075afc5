//! Append-only log of pairs that could not be answered

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::{StoreError, StoreResult};
use crate::providers::ErrorClass;

/// One terminal failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub question_id: String,
    pub model_id: String,
    pub provider: String,
    pub class: ErrorClass,
    pub message: String,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// JSON-lines failure log, one record per line
pub struct FailureLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The conventional location beside an answer store
    pub fn in_store(root: &Path) -> Self {
        Self::new(root.join("failures.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and sync it
    pub fn append(&self, record: &FailureRecord) -> StoreResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(format!("creating {}", parent.display()), e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(format!("opening {}", self.path.display()), e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| StoreError::io(format!("appending to {}", self.path.display()), e))
    }

    /// Read every record. A torn last line from a crash is skipped.
    pub fn records(&self) -> StoreResult<Vec<FailureRecord>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(format!("opening {}", self.path.display()), e)),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line =
                line.map_err(|e| StoreError::io(format!("reading {}", self.path.display()), e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(line = idx + 1, "Skipping unreadable failure record: {}", e)
                }
            }
        }
        Ok(records)
    }
}
