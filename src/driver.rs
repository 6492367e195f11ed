//! Run driver: resume-skip, batching, and progress reporting.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::IngestConfig;
use crate::coordinator::{BatchCoordinator, BatchReport, Batcher, WorkerPool};
use crate::embedder::{Embed, EmbeddingWorker};
use crate::failure_log::FailureLog;
use crate::index::{UpsertSink, VectorIndex};
use crate::reader::{RecordStream, SourceItem};
use crate::record::{Record, RecordId};

/// Where the driver is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Nothing loaded yet.
    Init,
    /// Discarding records up to and including the checkpoint identifier.
    Skipping,
    /// Forwarding records into batches.
    Streaming,
    /// Flushing the final partial batch.
    Draining,
    /// Finished.
    Done,
}

/// Decides which records are new relative to a checkpoint.
#[derive(Debug)]
pub struct ResumeFilter {
    target: Option<RecordId>,
    phase: RunPhase,
}

impl ResumeFilter {
    /// Filter that skips through `checkpoint`, or passes everything when absent.
    pub fn new(checkpoint: Option<RecordId>) -> Self {
        let phase = if checkpoint.is_some() {
            RunPhase::Skipping
        } else {
            RunPhase::Streaming
        };
        Self {
            target: checkpoint,
            phase,
        }
    }

    /// Current phase: `Skipping` until the checkpoint record is seen.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Whether `record` should be processed. The checkpoint record itself
    /// was already committed and is not admitted.
    pub fn admit(&mut self, record: &Record) -> bool {
        if self.phase != RunPhase::Skipping {
            return true;
        }
        if self.target.as_ref() == Some(&record.id) {
            info!(id = %record.id, "found checkpoint; resuming");
            self.phase = RunPhase::Streaming;
        }
        false
    }
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records committed to the index.
    pub processed: usize,
    /// Records written to the failure log.
    pub failed: usize,
    /// Records skipped while resuming.
    pub skipped: usize,
    /// Batches flushed.
    pub batches: usize,
    /// Batches whose upsert was rejected.
    pub failed_batches: usize,
    /// Source items without a usable identifier; included in `failed`.
    pub rejected: usize,
    /// Checkpoint the run resumed from.
    pub resumed_from: Option<RecordId>,
    /// Set when a checkpoint was present but never matched.
    pub checkpoint_missed: bool,
}

impl RunSummary {
    fn absorb(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.processed += report.committed;
        self.failed += report.failed;
        if report.commit_error.is_some() {
            self.failed_batches += 1;
        }
    }
}

/// Wires the reader, pool, sink, checkpoint, and failure log together.
pub struct RunDriver<E, I> {
    config: IngestConfig,
    embedder: E,
    index: I,
}

impl<E, I> RunDriver<E, I>
where
    E: Embed + Clone + 'static,
    I: VectorIndex,
{
    /// Driver for one ingestion run.
    pub fn new(config: IngestConfig, embedder: E, index: I) -> Self {
        Self {
            config,
            embedder,
            index,
        }
    }

    /// Runs to completion. Startup failures (index verification, unreadable
    /// source) and a malformed document abort the run; unusable items,
    /// per-record and per-batch failures are counted and logged instead.
    pub fn run(self) -> Result<RunSummary> {
        let Self {
            config,
            embedder,
            index,
        } = self;
        let mut phase = RunPhase::Init;
        info!(?phase, source = %config.data_file.display(), "starting ingestion");

        let checkpoint = CheckpointStore::new(&config.checkpoint_path);
        let sink = UpsertSink::new(index, config.index.clone(), checkpoint.clone());
        sink.ensure_index()
            .with_context(|| format!("failed to verify/create index {}", config.index.name))?;

        let resume_from = checkpoint.load();
        if let Some(id) = &resume_from {
            println!("Resuming from ID: {id}");
        }
        let mut failures = FailureLog::open(&config.failure_log_path);
        let records = RecordStream::open(&config.data_file, &config.item_path)?;

        let worker = EmbeddingWorker::new(embedder, config.retry, config.index.dimension);
        let pool = WorkerPool::spawn(worker, config.workers)?;
        let mut coordinator = BatchCoordinator::new(&pool, &sink, &mut failures);
        let mut batcher = Batcher::new(config.batch_size);
        let mut filter = ResumeFilter::new(resume_from.clone());
        let mut summary = RunSummary {
            resumed_from: resume_from,
            ..RunSummary::default()
        };
        println!(
            "Streaming {} (batch size {}, {} workers)...",
            config.data_file.display(),
            config.batch_size,
            pool.width()
        );

        phase = filter.phase();
        for item in records {
            let record = match item.context("aborting run: source document is malformed")? {
                SourceItem::Record(record) => record,
                SourceItem::Invalid(_) if filter.phase() == RunPhase::Skipping => {
                    summary.skipped += 1;
                    continue;
                }
                SourceItem::Invalid(invalid) => {
                    coordinator.reject(&invalid)?;
                    summary.failed += 1;
                    summary.rejected += 1;
                    continue;
                }
            };
            if !filter.admit(&record) {
                summary.skipped += 1;
                continue;
            }
            if phase != filter.phase() {
                phase = filter.phase();
                println!("Found checkpoint. Resuming processing...");
            }
            if let Some(batch) = batcher.push(record) {
                let report = coordinator.flush(batch)?;
                summary.absorb(&report);
                print_progress(&summary);
            }
        }

        if filter.phase() == RunPhase::Skipping {
            summary.checkpoint_missed = true;
            warn!(
                skipped = summary.skipped,
                "checkpoint identifier never appeared in the source; no new records processed"
            );
        }

        phase = RunPhase::Draining;
        if let Some(batch) = batcher.finish() {
            debug!(?phase, size = batch.len(), "flushing final batch");
            let report = coordinator.flush(batch)?;
            summary.absorb(&report);
            println!("Final batch of {} upserted.", report.size);
        }
        drop(coordinator);
        drop(pool);

        phase = RunPhase::Done;
        match sink.stats() {
            Ok(stats) => info!(?phase, stats = %stats, "index stats"),
            Err(err) => warn!(?phase, error = %err, "could not fetch index stats"),
        }
        info!(
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            batches = summary.batches,
            failure_log = %failures.path().display(),
            "ingestion finished"
        );
        Ok(summary)
    }
}

fn print_progress(summary: &RunSummary) {
    println!(
        "Processed {} items... (Failed: {})",
        summary.processed, summary.failed
    );
}
