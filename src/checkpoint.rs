//! Durable marker of the last fully committed batch.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::record::RecordId;
use crate::store::{write_json_atomic, StoreError};

/// On-disk checkpoint contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identifier of the last record in the last committed batch.
    #[serde(rename = "lastId")]
    pub last_id: RecordId,
    /// Seconds since the Unix epoch when the checkpoint was written.
    #[serde(default)]
    pub timestamp: f64,
}

/// Reads and overwrites the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store backed by `path`. Nothing is read until [`CheckpointStore::load`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the last committed identifier. A missing, unreadable, or
    /// corrupt checkpoint is reported as absent.
    pub fn load(&self) -> Option<RecordId> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no checkpoint present");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring unreadable checkpoint");
                return None;
            }
        };
        match serde_json::from_slice::<Checkpoint>(&raw) {
            Ok(checkpoint) => Some(checkpoint.last_id),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring corrupt checkpoint");
                None
            }
        }
    }

    /// Overwrites the checkpoint with `last_id` and the current time.
    pub fn save(&self, last_id: &RecordId) -> Result<Checkpoint, StoreError> {
        let checkpoint = Checkpoint {
            last_id: last_id.clone(),
            timestamp: now_epoch_secs(),
        };
        write_json_atomic(&self.path, &checkpoint)?;
        Ok(checkpoint)
    }
}

fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_checkpoint_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("ckpt.json"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn save_then_load_round_trips_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("ckpt.json"));
        let written = store.save(&RecordId::from("1042")).unwrap();
        assert_eq!(written.last_id, RecordId::from("1042"));
        assert!(written.timestamp > 0.0);
        assert_eq!(store.load(), Some(RecordId::from("1042")));

        store.save(&RecordId::from("2000")).unwrap();
        assert_eq!(store.load(), Some(RecordId::from("2000")));
    }

    #[test]
    fn writes_expected_wire_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("ckpt.json"));
        store.save(&RecordId::from("9")).unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["lastId"], "9");
        assert!(raw["timestamp"].is_f64());
    }

    #[test]
    fn corrupt_checkpoint_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.json");
        fs::write(&path, b"{\"lastId\": ").unwrap();
        assert_eq!(CheckpointStore::new(&path).load(), None);

        fs::write(&path, b"{\"other\": 1}").unwrap();
        assert_eq!(CheckpointStore::new(&path).load(), None);
    }

    #[test]
    fn accepts_numeric_identifier_without_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.json");
        fs::write(&path, b"{\"lastId\": 311}").unwrap();
        assert_eq!(CheckpointStore::new(&path).load(), Some(RecordId::from("311")));
    }
}
