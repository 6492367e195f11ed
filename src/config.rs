//! Command-line and environment configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use crate::coordinator::{DEFAULT_BATCH_SIZE, DEFAULT_WORKERS};
use crate::embedder::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TASK_TYPE};
use crate::embedder::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::index::pinecone::DEFAULT_CONTROL_URL;
use crate::index::{IndexSpec, Metric};
use crate::reader::DEFAULT_ITEM_PATH;

/// Checkpoint file used by real runs unless overridden.
pub const DEFAULT_CHECKPOINT_PATH: &str = "data/ingestion_checkpoint.json";
/// Failure log used by real runs unless overridden.
pub const DEFAULT_FAILURE_LOG_PATH: &str = "data/ingestion_failed.json";
/// Checkpoint file used by dry runs unless overridden.
pub const DRY_RUN_CHECKPOINT_PATH: &str = "data/dry_run_checkpoint.json";
/// Failure log used by dry runs unless overridden.
pub const DRY_RUN_FAILURE_LOG_PATH: &str = "data/dry_run_failed.json";

/// Invalid or incomplete configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required credential is absent or blank.
    #[error("missing credential: set {0}")]
    MissingCredential(&'static str),
    /// A knob has an unusable value.
    #[error("invalid {name}: {reason}")]
    Invalid {
        /// Flag name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Command-line interface for the ingestion binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "media-ingest",
    about = "Stream a JSON record collection into a vector index, resuming from the last checkpoint"
)]
pub struct Cli {
    /// Index service API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub pinecone_api_key: Option<String>,

    /// Embedding service API key
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// Source document
    #[arg(long, env = "MEDIA_INGEST_DATA_FILE", default_value = "data/full_knowledge_graph.json")]
    pub data_file: PathBuf,

    /// Dotted path to the record array inside the source document
    #[arg(long, env = "MEDIA_INGEST_ITEM_PATH", default_value = DEFAULT_ITEM_PATH)]
    pub item_path: String,

    /// Checkpoint file [default: data/ingestion_checkpoint.json, or
    /// data/dry_run_checkpoint.json with --dry-run]
    #[arg(long, env = "MEDIA_INGEST_CHECKPOINT")]
    pub checkpoint_file: Option<PathBuf>,

    /// Failure log file [default: data/ingestion_failed.json, or
    /// data/dry_run_failed.json with --dry-run]
    #[arg(long, env = "MEDIA_INGEST_FAILURE_LOG")]
    pub failure_log: Option<PathBuf>,

    /// Target index name
    #[arg(long, env = "PINECONE_INDEX_NAME", default_value = "media-knowledge-graph")]
    pub index_name: String,

    /// Namespace vectors are written to (empty for the default namespace)
    #[arg(long, env = "PINECONE_NAMESPACE", default_value = "")]
    pub namespace: String,

    /// Index service control-plane URL
    #[arg(long, env = "PINECONE_CONTROL_URL", default_value = DEFAULT_CONTROL_URL)]
    pub control_url: String,

    /// Vector dimension of the index
    #[arg(long, env = "MEDIA_INGEST_DIMENSION", default_value_t = 768)]
    pub dimension: usize,

    /// Similarity metric used when creating the index
    #[arg(long, env = "MEDIA_INGEST_METRIC", value_enum, default_value_t = Metric::Dotproduct)]
    pub metric: Metric,

    /// Serverless cloud used when creating the index
    #[arg(long, env = "PINECONE_CLOUD", default_value = "aws")]
    pub cloud: String,

    /// Serverless region used when creating the index
    #[arg(long, env = "PINECONE_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Embedding service API root
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub gemini_base_url: String,

    /// Embedding model
    #[arg(long, env = "GEMINI_EMBED_MODEL", default_value = DEFAULT_MODEL)]
    pub embed_model: String,

    /// Embedding task type tag
    #[arg(long, env = "GEMINI_TASK_TYPE", default_value = DEFAULT_TASK_TYPE)]
    pub task_type: String,

    /// Records per batch
    #[arg(long, env = "MEDIA_INGEST_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Concurrent embedding calls
    #[arg(long, env = "MEDIA_INGEST_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Embedding attempts per record, including the first
    #[arg(long, env = "MEDIA_INGEST_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Backoff unit in milliseconds after a rate-limited attempt
    #[arg(long, env = "MEDIA_INGEST_BACKOFF_MS", default_value_t = 2000)]
    pub backoff_ms: u64,

    /// HTTP timeout in seconds for every service call
    #[arg(long, env = "MEDIA_INGEST_HTTP_TIMEOUT", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Count vectors instead of sending them to the index service; keeps its
    /// own checkpoint and failure log
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Debug-level diagnostics on stderr
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Only errors on stderr
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}

impl Cli {
    /// Validates the parsed CLI and converts it into an [`IngestConfig`].
    pub fn build_config(&self) -> Result<IngestConfig, ConfigError> {
        let google_api_key = credential(self.google_api_key.as_deref(), "GOOGLE_API_KEY")?;
        let pinecone_api_key = if self.dry_run {
            None
        } else {
            Some(credential(
                self.pinecone_api_key.as_deref(),
                "PINECONE_API_KEY",
            )?)
        };
        nonzero("--batch-size", self.batch_size)?;
        nonzero("--workers", self.workers)?;
        nonzero("--dimension", self.dimension)?;
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "--max-attempts",
                reason: "must allow at least one attempt".into(),
            });
        }
        if self.index_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "--index-name",
                reason: "must not be blank".into(),
            });
        }
        let (checkpoint_path, failure_log_path) = self.state_paths()?;

        Ok(IngestConfig {
            data_file: self.data_file.clone(),
            item_path: self.item_path.clone(),
            checkpoint_path,
            failure_log_path,
            batch_size: self.batch_size,
            workers: self.workers,
            retry: RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms)),
            index: IndexSpec {
                name: self.index_name.trim().to_string(),
                dimension: self.dimension,
                metric: self.metric,
                cloud: self.cloud.clone(),
                region: self.region.clone(),
            },
            services: ServiceConfig {
                google_api_key,
                pinecone_api_key,
                gemini_base_url: self.gemini_base_url.clone(),
                embed_model: self.embed_model.clone(),
                task_type: self.task_type.clone(),
                control_url: self.control_url.clone(),
                namespace: self.namespace.clone(),
                http_timeout: Duration::from_secs(self.http_timeout_secs.max(1)),
            },
            dry_run: self.dry_run,
        })
    }
}

impl Cli {
    /// Checkpoint and failure-log paths. Dry runs default to their own files
    /// and may not write the real default ones.
    fn state_paths(&self) -> Result<(PathBuf, PathBuf), ConfigError> {
        let (checkpoint_default, failure_default) = if self.dry_run {
            (DRY_RUN_CHECKPOINT_PATH, DRY_RUN_FAILURE_LOG_PATH)
        } else {
            (DEFAULT_CHECKPOINT_PATH, DEFAULT_FAILURE_LOG_PATH)
        };
        let checkpoint = self
            .checkpoint_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(checkpoint_default));
        let failure_log = self
            .failure_log
            .clone()
            .unwrap_or_else(|| PathBuf::from(failure_default));
        if self.dry_run {
            if checkpoint == Path::new(DEFAULT_CHECKPOINT_PATH) {
                return Err(ConfigError::Invalid {
                    name: "--checkpoint-file",
                    reason: "a dry run must not write the real checkpoint".into(),
                });
            }
            if failure_log == Path::new(DEFAULT_FAILURE_LOG_PATH) {
                return Err(ConfigError::Invalid {
                    name: "--failure-log",
                    reason: "a dry run must not write the real failure log".into(),
                });
            }
        }
        Ok((checkpoint, failure_log))
    }
}

fn credential(value: Option<&str>, var: &'static str) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(ConfigError::MissingCredential(var)),
    }
}

fn nonzero(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}

/// Validated settings for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Source document.
    pub data_file: PathBuf,
    /// Dotted path to the record array.
    pub item_path: String,
    /// Checkpoint file.
    pub checkpoint_path: PathBuf,
    /// Failure log file.
    pub failure_log_path: PathBuf,
    /// Records per batch.
    pub batch_size: usize,
    /// Embedding pool width.
    pub workers: usize,
    /// Per-record retry bounds.
    pub retry: RetryPolicy,
    /// Target index.
    pub index: IndexSpec,
    /// Endpoints and credentials for the external services.
    pub services: ServiceConfig,
    /// Count vectors instead of committing them to the index service.
    pub dry_run: bool,
}

impl IngestConfig {
    /// Config with default knobs for the given files and index, mainly for
    /// embedding the pipeline in other programs and tests.
    pub fn new(
        data_file: impl Into<PathBuf>,
        checkpoint_path: impl Into<PathBuf>,
        failure_log_path: impl Into<PathBuf>,
        index: IndexSpec,
    ) -> Self {
        Self {
            data_file: data_file.into(),
            item_path: DEFAULT_ITEM_PATH.to_string(),
            checkpoint_path: checkpoint_path.into(),
            failure_log_path: failure_log_path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            index,
            services: ServiceConfig::default(),
            dry_run: true,
        }
    }
}

/// Service endpoints and credentials. Keys are redacted from `Debug`.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Embedding service key.
    pub google_api_key: String,
    /// Index service key; absent on dry runs.
    pub pinecone_api_key: Option<String>,
    /// Embedding service API root.
    pub gemini_base_url: String,
    /// Embedding model.
    pub embed_model: String,
    /// Embedding task type tag.
    pub task_type: String,
    /// Index service control-plane URL.
    pub control_url: String,
    /// Index namespace.
    pub namespace: String,
    /// HTTP timeout per call.
    pub http_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            google_api_key: String::new(),
            pinecone_api_key: None,
            gemini_base_url: DEFAULT_BASE_URL.to_string(),
            embed_model: DEFAULT_MODEL.to_string(),
            task_type: DEFAULT_TASK_TYPE.to_string(),
            control_url: DEFAULT_CONTROL_URL.to_string(),
            namespace: String::new(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("google_api_key", &"<redacted>")
            .field(
                "pinecone_api_key",
                &self.pinecone_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("gemini_base_url", &self.gemini_base_url)
            .field("embed_model", &self.embed_model)
            .field("task_type", &self.task_type)
            .field("control_url", &self.control_url)
            .field("namespace", &self.namespace)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["media-ingest"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = parse(&["--google-api-key", "g", "--pinecone-api-key", "p"]);
        let config = cli.build_config().unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.workers, 15);
        assert_eq!(config.retry, RetryPolicy::new(3, Duration::from_secs(2)));
        assert_eq!(
            config.index,
            IndexSpec {
                name: "media-knowledge-graph".into(),
                dimension: 768,
                metric: Metric::Dotproduct,
                cloud: "aws".into(),
                region: "us-east-1".into(),
            }
        );
        assert_eq!(config.item_path, "data.movies.item");
        assert_eq!(config.checkpoint_path, PathBuf::from("data/ingestion_checkpoint.json"));
        assert_eq!(config.failure_log_path, PathBuf::from("data/ingestion_failed.json"));
        assert_eq!(config.services.embed_model, "models/text-embedding-004");
        assert_eq!(config.services.task_type, "RETRIEVAL_DOCUMENT");
        assert_eq!(config.services.pinecone_api_key.as_deref(), Some("p"));
    }

    #[test]
    fn blank_credentials_are_rejected() {
        let cli = parse(&["--google-api-key", "  ", "--pinecone-api-key", "p"]);
        assert!(matches!(
            cli.build_config(),
            Err(ConfigError::MissingCredential("GOOGLE_API_KEY"))
        ));

        let cli = parse(&["--google-api-key", "g", "--pinecone-api-key", ""]);
        assert!(matches!(
            cli.build_config(),
            Err(ConfigError::MissingCredential("PINECONE_API_KEY"))
        ));
    }

    #[test]
    fn dry_run_does_not_need_index_key() {
        let cli = parse(&["--google-api-key", "g", "--pinecone-api-key", "", "--dry-run"]);
        let config = cli.build_config().unwrap();
        assert!(config.dry_run);
        assert_eq!(config.services.pinecone_api_key, None);
    }

    #[test]
    fn dry_run_keeps_separate_state_files() {
        let real = parse(&["--google-api-key", "g", "--pinecone-api-key", "p"])
            .build_config()
            .unwrap();
        let dry = parse(&["--google-api-key", "g", "--dry-run"])
            .build_config()
            .unwrap();

        assert_eq!(real.checkpoint_path, PathBuf::from(DEFAULT_CHECKPOINT_PATH));
        assert_eq!(real.failure_log_path, PathBuf::from(DEFAULT_FAILURE_LOG_PATH));
        assert_eq!(dry.checkpoint_path, PathBuf::from(DRY_RUN_CHECKPOINT_PATH));
        assert_eq!(dry.failure_log_path, PathBuf::from(DRY_RUN_FAILURE_LOG_PATH));
        assert_ne!(dry.checkpoint_path, real.checkpoint_path);
        assert_ne!(dry.failure_log_path, real.failure_log_path);
    }

    #[test]
    fn dry_run_refuses_real_state_files() {
        let cli = parse(&[
            "--google-api-key",
            "g",
            "--dry-run",
            "--checkpoint-file",
            DEFAULT_CHECKPOINT_PATH,
        ]);
        assert!(matches!(
            cli.build_config(),
            Err(ConfigError::Invalid {
                name: "--checkpoint-file",
                ..
            })
        ));

        let cli = parse(&[
            "--google-api-key",
            "g",
            "--dry-run",
            "--failure-log",
            DEFAULT_FAILURE_LOG_PATH,
        ]);
        assert!(matches!(
            cli.build_config(),
            Err(ConfigError::Invalid {
                name: "--failure-log",
                ..
            })
        ));
    }

    #[test]
    fn explicit_state_paths_win() {
        let config = parse(&[
            "--google-api-key",
            "g",
            "--dry-run",
            "--checkpoint-file",
            "/tmp/a.json",
            "--failure-log",
            "/tmp/b.json",
        ])
        .build_config()
        .unwrap();
        assert_eq!(config.checkpoint_path, PathBuf::from("/tmp/a.json"));
        assert_eq!(config.failure_log_path, PathBuf::from("/tmp/b.json"));
    }

    #[test]
    fn zero_sized_knobs_are_invalid() {
        let cli = parse(&[
            "--google-api-key",
            "g",
            "--pinecone-api-key",
            "p",
            "--workers",
            "0",
        ]);
        assert!(matches!(
            cli.build_config(),
            Err(ConfigError::Invalid { name: "--workers", .. })
        ));
    }

    #[test]
    fn debug_output_hides_keys() {
        let cli = parse(&["--google-api-key", "secret-g", "--pinecone-api-key", "secret-p"]);
        let rendered = format!("{:?}", cli.build_config().unwrap());
        assert!(!rendered.contains("secret-g"));
        assert!(!rendered.contains("secret-p"));
    }
}
