//! Fixed-size batching and bounded fan-out of embedding work.

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::embedder::{Embed, EmbeddingFailure, EmbeddingWorker, FailureReason};
use crate::failure_log::{FailureEntry, FailureLog};
use crate::index::{UpsertSink, VectorIndex};
use crate::record::{InvalidRecord, PreparedRecord, Record, RecordId, UpsertUnit};

/// Records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Concurrent embedding calls.
pub const DEFAULT_WORKERS: usize = 15;

const STALL_REPORT_INTERVAL: Duration = Duration::from_secs(30);

type EmbedResult = Result<UpsertUnit, EmbeddingFailure>;

struct EmbedTask {
    slot: usize,
    item: PreparedRecord,
}

struct EmbedOutcome {
    slot: usize,
    result: EmbedResult,
}

/// Long-lived pool of embedding threads shared by every batch.
pub struct WorkerPool {
    task_tx: Option<Sender<EmbedTask>>,
    result_rx: Receiver<EmbedOutcome>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `width` threads, each running `worker` on tasks as they arrive.
    pub fn spawn<E>(worker: EmbeddingWorker<E>, width: usize) -> Result<Self>
    where
        E: Embed + Clone + 'static,
    {
        let width = width.max(1);
        let (task_tx, task_rx) = bounded::<EmbedTask>(width);
        let (result_tx, result_rx) = unbounded::<EmbedOutcome>();

        let mut handles = Vec::with_capacity(width);
        for worker_id in 0..width {
            let worker = worker.clone();
            let rx = task_rx.clone();
            let tx = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("embed-{worker_id}"))
                .spawn(move || worker_loop(worker_id, rx, tx, worker))
                .with_context(|| format!("failed to spawn embedding worker {worker_id}"))?;
            handles.push(handle);
        }
        debug!(width, "embedding pool started");
        Ok(Self {
            task_tx: Some(task_tx),
            result_rx,
            handles,
        })
    }

    /// Number of worker threads.
    pub fn width(&self) -> usize {
        self.handles.len()
    }

    /// Embeds every item and waits until all of them have a result. Results
    /// come back in input order regardless of completion order.
    pub fn run_batch(&self, items: Vec<PreparedRecord>) -> Result<Vec<EmbedResult>> {
        let sender = self
            .task_tx
            .as_ref()
            .ok_or_else(|| anyhow!("embedding pool already shut down"))?;
        let expected = items.len();
        for (slot, item) in items.into_iter().enumerate() {
            sender
                .send(EmbedTask { slot, item })
                .map_err(|_| anyhow!("embedding worker channel closed"))?;
        }

        let mut slots: Vec<Option<EmbedResult>> = (0..expected).map(|_| None).collect();
        let mut received = 0usize;
        while received < expected {
            match self.result_rx.recv_timeout(STALL_REPORT_INTERVAL) {
                Ok(outcome) => {
                    if let Some(slot) = slots.get_mut(outcome.slot) {
                        *slot = Some(outcome.result);
                        received += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        pending = expected - received,
                        "still waiting on embedding results"
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    anyhow::bail!(
                        "embedding workers exited with {} result(s) outstanding",
                        expected - received
                    )
                }
            }
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.task_tx.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("embedding worker panicked");
            }
        }
    }
}

fn worker_loop<E: Embed>(
    worker_id: usize,
    receiver: Receiver<EmbedTask>,
    sender: Sender<EmbedOutcome>,
    worker: EmbeddingWorker<E>,
) {
    for EmbedTask { slot, item } in receiver.iter() {
        let record = item.record.clone();
        // a panicking backend must still answer for its slot
        let result = panic::catch_unwind(AssertUnwindSafe(|| worker.embed(item)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(
                    worker_id,
                    slot,
                    id = %record.id,
                    panic = %message,
                    "embedding worker panicked"
                );
                Err(EmbeddingFailure {
                    record,
                    reason: FailureReason::Panicked(message),
                })
            });
        if let Err(failure) = &result {
            debug!(worker_id, slot, error = %failure, "record failed");
        }
        if sender.send(EmbedOutcome { slot, result }).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Groups records into fixed-size batches in arrival order.
#[derive(Debug)]
pub struct Batcher {
    size: usize,
    buffer: Vec<Record>,
}

impl Batcher {
    /// Batcher emitting batches of `size` records (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            buffer: Vec::with_capacity(size),
        }
    }

    /// Buffers `record`; returns a full batch once `size` records are held.
    pub fn push(&mut self, record: Record) -> Option<Vec<Record>> {
        self.buffer.push(record);
        if self.buffer.len() >= self.size {
            let next = Vec::with_capacity(self.size);
            return Some(mem::replace(&mut self.buffer, next));
        }
        None
    }

    /// Returns whatever is left, if anything.
    pub fn finish(&mut self) -> Option<Vec<Record>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(mem::take(&mut self.buffer))
        }
    }
}

/// Result of flushing one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Records in the batch.
    pub size: usize,
    /// Records committed to the index.
    pub committed: usize,
    /// Records written to the failure log.
    pub failed: usize,
    /// Identifier of the last record in the batch.
    pub last_id: RecordId,
    /// Commit failure, if the upsert was rejected.
    pub commit_error: Option<String>,
}

/// Drives one batch through embedding, commit, and failure logging.
pub struct BatchCoordinator<'a, I> {
    pool: &'a WorkerPool,
    sink: &'a UpsertSink<I>,
    failures: &'a mut FailureLog,
}

impl<'a, I: VectorIndex> BatchCoordinator<'a, I> {
    /// Coordinator sharing the given pool, sink, and failure log.
    pub fn new(
        pool: &'a WorkerPool,
        sink: &'a UpsertSink<I>,
        failures: &'a mut FailureLog,
    ) -> Self {
        Self {
            pool,
            sink,
            failures,
        }
    }

    /// Embeds, commits, and accounts for every record in `batch`. Per-record
    /// and per-batch failures end up in the failure log; only pool breakdown
    /// and failure-log write errors are returned.
    pub fn flush(&mut self, batch: Vec<Record>) -> Result<BatchReport> {
        let Some(last_id) = batch.last().map(|record| record.id.clone()) else {
            anyhow::bail!("refusing to flush an empty batch");
        };
        let size = batch.len();
        let prepared: Vec<PreparedRecord> = batch.into_iter().map(Record::prepare).collect();
        let results = self.pool.run_batch(prepared)?;

        let mut units = Vec::with_capacity(size);
        let mut failed_entries = Vec::new();
        for result in results {
            match result {
                Ok(unit) => units.push(unit),
                Err(failure) => {
                    failed_entries.push(FailureEntry::new(&failure.record, &failure.reason))
                }
            }
        }

        let mut report = BatchReport {
            size,
            committed: units.len(),
            failed: failed_entries.len(),
            last_id,
            commit_error: None,
        };

        if let Err(err) = self.sink.commit(&units, &report.last_id) {
            error!(
                error = %err,
                batch_size = size,
                last_id = %report.last_id,
                "batch upsert failed"
            );
            let message = format!("batch upsert failed: {err}");
            failed_entries.extend(units.iter().map(|unit| FailureEntry {
                id: unit.id.to_string(),
                title: Some(unit.metadata.title.clone()),
                error: message.clone(),
            }));
            report.committed = 0;
            report.failed = failed_entries.len();
            report.commit_error = Some(err.to_string());
        }

        self.failures.append_all(failed_entries).with_context(|| {
            format!(
                "failed to record failures for batch ending at {}",
                report.last_id
            )
        })?;
        Ok(report)
    }

    /// Records a source item that never became a record. It takes no part
    /// in any batch and does not move the checkpoint.
    pub fn reject(&mut self, invalid: &InvalidRecord) -> Result<()> {
        warn!(raw_id = %invalid.raw_id, reason = %invalid.reason, "skipping unusable source item");
        self.failures
            .append(FailureEntry::from_invalid(invalid))
            .context("failed to record unusable source item")
    }
}
