//! Vector index boundary and the sink that commits batches to it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::record::{RecordId, UpsertUnit};

pub mod counting;
pub mod memory;
pub mod pinecone;

pub use counting::CountingIndex;
pub use memory::InMemoryIndex;
pub use pinecone::PineconeIndex;

/// Similarity metric of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity.
    Cosine,
    /// Euclidean distance.
    Euclidean,
    /// Inner product.
    Dotproduct,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Dotproduct => "dotproduct",
        })
    }
}

/// Parameters used to create the target index when it is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Vector dimension.
    pub dimension: usize,
    /// Similarity metric.
    pub metric: Metric,
    /// Serverless cloud provider.
    pub cloud: String,
    /// Serverless region.
    pub region: String,
}

/// Summary of an existing index as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescription {
    /// Index name.
    pub name: String,
    /// Vector dimension, when reported.
    #[serde(default)]
    pub dimension: Option<usize>,
    /// Similarity metric, when reported.
    #[serde(default)]
    pub metric: Option<Metric>,
    /// Data-plane host, when reported.
    #[serde(default)]
    pub host: Option<String>,
}

/// Failure talking to the index service.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The service answered with a non-success status.
    #[error("index service returned {status}: {body}")]
    Service {
        /// HTTP status code.
        status: u16,
        /// Response body, if readable.
        body: String,
    },
    /// The request never produced a response.
    #[error("index request failed: {0}")]
    Transport(reqwest::Error),
    /// The service response was missing something required.
    #[error("unexpected index response: {0}")]
    Unexpected(String),
    /// The index was explicitly rejected or is unusable.
    #[error("{0}")]
    Rejected(String),
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err)
    }
}

/// Operations the pipeline needs from a vector index service.
pub trait VectorIndex {
    /// Names and descriptions of every index visible to the caller.
    fn list_indexes(&self) -> Result<Vec<IndexDescription>, IndexError>;
    /// Creates an index.
    fn create_index(&self, spec: &IndexSpec) -> Result<(), IndexError>;
    /// Describes one index by name.
    fn describe_index(&self, name: &str) -> Result<IndexDescription, IndexError>;
    /// Inserts or replaces `units` by id; returns the count acknowledged.
    fn upsert(&self, units: &[UpsertUnit]) -> Result<usize, IndexError>;
    /// Service-defined statistics for the bound index.
    fn describe_index_stats(&self) -> Result<serde_json::Value, IndexError>;
}

impl<T: VectorIndex + ?Sized> VectorIndex for &T {
    fn list_indexes(&self) -> Result<Vec<IndexDescription>, IndexError> {
        (**self).list_indexes()
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), IndexError> {
        (**self).create_index(spec)
    }

    fn describe_index(&self, name: &str) -> Result<IndexDescription, IndexError> {
        (**self).describe_index(name)
    }

    fn upsert(&self, units: &[UpsertUnit]) -> Result<usize, IndexError> {
        (**self).upsert(units)
    }

    fn describe_index_stats(&self) -> Result<serde_json::Value, IndexError> {
        (**self).describe_index_stats()
    }
}

/// Commits batches to the index and advances the checkpoint after each
/// successful commit.
pub struct UpsertSink<I> {
    index: I,
    spec: IndexSpec,
    checkpoint: CheckpointStore,
}

impl<I: VectorIndex> UpsertSink<I> {
    /// Sink writing to `index` and checkpointing into `checkpoint`.
    pub fn new(index: I, spec: IndexSpec, checkpoint: CheckpointStore) -> Self {
        Self {
            index,
            spec,
            checkpoint,
        }
    }

    /// The underlying index.
    pub fn index(&self) -> &I {
        &self.index
    }

    /// The checkpoint this sink advances.
    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Makes sure the target index exists, creating it when absent. Safe to
    /// call repeatedly.
    pub fn ensure_index(&self) -> Result<IndexDescription, IndexError> {
        let existing = self.index.list_indexes()?;
        if existing.iter().any(|desc| desc.name == self.spec.name) {
            debug!(index = %self.spec.name, "index already present");
        } else {
            warn!(index = %self.spec.name, "index not found; creating");
            self.index.create_index(&self.spec)?;
        }
        let description = self.index.describe_index(&self.spec.name)?;
        if let Some(dimension) = description.dimension {
            if dimension != self.spec.dimension {
                return Err(IndexError::Rejected(format!(
                    "index {} has dimension {}, expected {}",
                    self.spec.name, dimension, self.spec.dimension
                )));
            }
        }
        info!(
            index = %description.name,
            host = description.host.as_deref().unwrap_or("-"),
            "index ready"
        );
        Ok(description)
    }

    /// Upserts `units` and, on success, checkpoints `last_id`. An empty batch
    /// commits nothing but still advances the checkpoint.
    pub fn commit(&self, units: &[UpsertUnit], last_id: &RecordId) -> Result<(), IndexError> {
        if !units.is_empty() {
            let acknowledged = self.index.upsert(units)?;
            if acknowledged != units.len() {
                warn!(
                    sent = units.len(),
                    acknowledged, "index acknowledged fewer vectors than sent"
                );
            }
        }
        // A lagging checkpoint only costs re-embedding on the next run.
        if let Err(err) = self.checkpoint.save(last_id) {
            warn!(error = %err, last_id = %last_id, "failed to persist checkpoint");
        }
        Ok(())
    }

    /// Statistics reported by the index service.
    pub fn stats(&self) -> Result<serde_json::Value, IndexError> {
        self.index.describe_index_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Metadata, RecordId};

    fn spec() -> IndexSpec {
        IndexSpec {
            name: "media".into(),
            dimension: 3,
            metric: Metric::Dotproduct,
            cloud: "aws".into(),
            region: "us-east-1".into(),
        }
    }

    fn unit(id: &str, value: f32) -> UpsertUnit {
        UpsertUnit {
            id: RecordId::from(id),
            values: vec![value; 3],
            metadata: Metadata {
                title: id.into(),
                year: String::new(),
                genres: String::new(),
                poster_path: String::new(),
                overview: String::new(),
                vote_average: 0.0,
                popularity: 0.0,
            },
        }
    }

    #[test]
    fn ensure_index_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryIndex::new();
        let sink = UpsertSink::new(&index, spec(), CheckpointStore::new(dir.path().join("c.json")));

        sink.ensure_index().unwrap();
        sink.ensure_index().unwrap();

        let listed = index.list_indexes().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metric, Some(Metric::Dotproduct));
        assert_eq!(index.create_calls(), 1);
    }

    #[test]
    fn ensure_index_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryIndex::new();
        index
            .create_index(&IndexSpec {
                dimension: 8,
                ..spec()
            })
            .unwrap();
        let sink = UpsertSink::new(&index, spec(), CheckpointStore::new(dir.path().join("c.json")));
        assert!(matches!(sink.ensure_index(), Err(IndexError::Rejected(_))));
    }

    #[test]
    fn commit_advances_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryIndex::new();
        let sink = UpsertSink::new(&index, spec(), CheckpointStore::new(dir.path().join("c.json")));

        sink.commit(&[unit("1", 0.1), unit("2", 0.2)], &RecordId::from("3"))
            .unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(sink.checkpoint().load(), Some(RecordId::from("3")));
    }

    #[test]
    fn recommitting_same_unit_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryIndex::new();
        let sink = UpsertSink::new(&index, spec(), CheckpointStore::new(dir.path().join("c.json")));

        sink.commit(&[unit("1", 0.1)], &RecordId::from("1")).unwrap();
        let once = index.snapshot();
        sink.commit(&[unit("1", 0.1)], &RecordId::from("1")).unwrap();

        assert_eq!(index.snapshot(), once);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn empty_commit_skips_index_but_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let index = InMemoryIndex::new();
        let sink = UpsertSink::new(&index, spec(), CheckpointStore::new(dir.path().join("c.json")));

        sink.commit(&[], &RecordId::from("9")).unwrap();

        assert_eq!(index.upsert_calls(), 0);
        assert_eq!(sink.checkpoint().load(), Some(RecordId::from("9")));
    }
}
