//! Append-only record of items that could not be ingested.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::record::{InvalidRecord, Record};
use crate::store::{write_json_atomic, StoreError};

/// One permanently failed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    /// Record identifier.
    pub id: String,
    /// Record title, when the source had one.
    pub title: Option<String>,
    /// Human-readable failure description.
    pub error: String,
}

impl FailureEntry {
    /// Entry describing `record` failing with `error`.
    pub fn new(record: &Record, error: impl ToString) -> Self {
        Self {
            id: record.id.to_string(),
            title: record.title.clone(),
            error: error.to_string(),
        }
    }

    /// Entry for a source item that never became a record.
    pub fn from_invalid(invalid: &InvalidRecord) -> Self {
        Self {
            id: invalid.raw_id.clone(),
            title: invalid.title.clone(),
            error: invalid.to_string(),
        }
    }
}

/// JSON-array failure log. Existing entries are loaded once and the whole
/// array is rewritten on every append, so entries survive restarts and are
/// never removed.
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    entries: Vec<FailureEntry>,
}

impl FailureLog {
    /// Opens the log at `path`. A missing file starts an empty log; an
    /// unreadable or corrupt one is also treated as empty and will be
    /// replaced on the next append.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "discarding corrupt failure log");
                Vec::new()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding unreadable failure log");
                Vec::new()
            }
        };
        Self { path, entries }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries recorded so far, including those from earlier runs.
    pub fn entries(&self) -> &[FailureEntry] {
        &self.entries
    }

    /// Durably records a single failure.
    pub fn append(&mut self, entry: FailureEntry) -> Result<(), StoreError> {
        self.append_all(std::iter::once(entry))
    }

    /// Durably records several failures with one rewrite.
    pub fn append_all<I>(&mut self, entries: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = FailureEntry>,
    {
        let before = self.entries.len();
        self.entries.extend(entries);
        if self.entries.len() == before {
            return Ok(());
        }
        if let Err(err) = write_json_atomic(&self.path, &self.entries) {
            self.entries.truncate(before);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(id: &str) -> FailureEntry {
        FailureEntry {
            id: id.to_string(),
            title: Some(format!("title {id}")),
            error: "boom".to_string(),
        }
    }

    #[test]
    fn appends_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.json");

        let mut log = FailureLog::open(&path);
        log.append(entry("1")).unwrap();
        log.append(entry("2")).unwrap();

        let mut reopened = FailureLog::open(&path);
        assert_eq!(reopened.entries(), &[entry("1"), entry("2")]);
        reopened.append_all(vec![entry("3"), entry("4")]).unwrap();

        let raw: Vec<FailureEntry> =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw, vec![entry("1"), entry("2"), entry("3"), entry("4")]);
    }

    #[test]
    fn empty_batch_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.json");
        FailureLog::open(&path).append_all(Vec::new()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_log_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.json");
        fs::write(&path, b"[{\"id\": ").unwrap();

        let mut log = FailureLog::open(&path);
        assert!(log.entries().is_empty());
        log.append(entry("5")).unwrap();
        assert_eq!(FailureLog::open(&path).entries(), &[entry("5")]);
    }

    #[test]
    fn entry_from_record_keeps_missing_title() {
        let record: Record = serde_json::from_value(serde_json::json!({"id": 3})).unwrap();
        let entry = FailureEntry::new(&record, "rate limited");
        assert_eq!(entry.id, "3");
        assert_eq!(entry.title, None);
        assert_eq!(entry.error, "rate limited");
    }
}
