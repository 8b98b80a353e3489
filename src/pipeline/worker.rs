//! Worker thread logic for chunked parallel migration
//!
//! Each worker:
//! - Pulls a chunk of up to `chunk_size` documents from the shared reader
//! - Drives every document of the chunk through the document writer
//! - Sends the finished items back to the coordinator
//!
//! Reading is serialized by the job state lock; writing runs in parallel.

use crate::config::MigrationConfig;
use crate::error::WorkerError;
use crate::job::{CounterKind, DocumentWorkItem, ItemStatus, JobState};
use crate::reader::ItemReader;
use crate::writer::DocumentWriter;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Chunks written
    pub chunks: AtomicU64,

    /// Documents written, whatever their outcome
    pub documents: AtomicU64,

    /// Documents that failed
    pub failures: AtomicU64,

    /// Content bytes uploaded
    pub bytes: AtomicU64,

    /// Units of work the reader could not produce
    pub read_errors: AtomicU64,
}

impl WorkerStats {
    fn record_chunk(&self, items: &[DocumentWorkItem]) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.documents.fetch_add(items.len() as u64, Ordering::Relaxed);

        let failures = items.iter().filter(|i| i.status == ItemStatus::Failed).count();
        self.failures.fetch_add(failures as u64, Ordering::Relaxed);

        let bytes: u64 = items.iter().map(|i| i.bytes_uploaded).sum();
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared handles a worker needs
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<MigrationConfig>,
    pub job: Arc<JobState>,
    pub reader: Arc<dyn ItemReader>,
    pub writer: Arc<DocumentWriter>,
    pub shutdown: Arc<AtomicBool>,
}

/// A worker thread that processes document chunks
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<Result<(), WorkerError>>>,

    /// Worker statistics
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a new worker thread
    pub fn spawn(
        id: usize,
        context: WorkerContext,
        outcomes: Sender<DocumentWorkItem>,
    ) -> Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("migrate-{}", id))
            .spawn(move || worker_loop(id, context, outcomes, stats_clone))
            .map_err(|e| WorkerError::InitFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Get worker statistics
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Wait for the worker to finish
    pub fn join(&mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Panicked {
                    id: self.id,
                    message: "Worker thread panicked".into(),
                }),
            }
        } else {
            Ok(())
        }
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    context: WorkerContext,
    outcomes: Sender<DocumentWorkItem>,
    stats: Arc<WorkerStats>,
) -> Result<(), WorkerError> {
    debug!(worker = id, "Worker starting");

    while !context.shutdown.load(Ordering::Relaxed) {
        let chunk = read_chunk(id, &context, &stats);
        if chunk.is_empty() {
            break;
        }

        let written = context.writer.write_chunk(id, chunk);
        stats.record_chunk(&written);

        for item in written {
            outcomes.send(item).map_err(|_| WorkerError::ChannelClosed)?;
        }
    }

    info!(
        worker = id,
        chunks = stats.chunks.load(Ordering::Relaxed),
        documents = stats.documents.load(Ordering::Relaxed),
        failures = stats.failures.load(Ordering::Relaxed),
        "Worker shutting down"
    );

    Ok(())
}

/// Pull up to `chunk_size` documents; an empty chunk means the source is exhausted
fn read_chunk(id: usize, context: &WorkerContext, stats: &WorkerStats) -> Vec<DocumentWorkItem> {
    let mut chunk = Vec::with_capacity(context.config.chunk_size);

    while chunk.len() < context.config.chunk_size {
        match context.reader.read() {
            Ok(Some(item)) => chunk.push(item),
            Ok(None) => break,
            Err(e) => {
                warn!(worker = id, error = %e, "Unable to read documents");
                stats.record_read_error();
                context.job.counters().increment(CounterKind::Failed);
            }
        }
    }

    chunk
}

/// Aggregate statistics from multiple workers
///
/// Returns (chunks, documents, failures, bytes, read errors).
pub fn aggregate_stats(workers: &[Worker]) -> (u64, u64, u64, u64, u64) {
    let mut chunks = 0u64;
    let mut documents = 0u64;
    let mut failures = 0u64;
    let mut bytes = 0u64;
    let mut read_errors = 0u64;

    for worker in workers {
        let stats = worker.stats();
        chunks += stats.chunks.load(Ordering::Relaxed);
        documents += stats.documents.load(Ordering::Relaxed);
        failures += stats.failures.load(Ordering::Relaxed);
        bytes += stats.bytes.load(Ordering::Relaxed);
        read_errors += stats.read_errors.load(Ordering::Relaxed);
    }

    (chunks, documents, failures, bytes, read_errors)
}
