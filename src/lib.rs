#![warn(missing_docs)]
//! Resumable, batched ingestion of large JSON record collections into a
//! vector index.

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod embedder;
pub mod failure_log;
pub mod index;
pub mod reader;
pub mod record;
mod store;
pub mod telemetry;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{Cli, ConfigError, IngestConfig, ServiceConfig};
pub use coordinator::{BatchCoordinator, BatchReport, Batcher, WorkerPool};
pub use driver::{ResumeFilter, RunDriver, RunPhase, RunSummary};
pub use embedder::{Embed, EmbedError, EmbeddingFailure, EmbeddingWorker, RetryPolicy};
pub use failure_log::{FailureEntry, FailureLog};
pub use index::{IndexError, IndexSpec, Metric, UpsertSink, VectorIndex};
pub use reader::{ParseError, RecordStream, SourceItem};
pub use record::{InvalidRecord, Metadata, PreparedRecord, Record, RecordId, UpsertUnit};
pub use store::StoreError;
