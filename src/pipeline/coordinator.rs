//! Migration coordinator - orchestrates the chunked parallel run
//!
//! The coordinator is responsible for:
//! - Validating connectivity before any document is touched
//! - Building the reader for the configured profile
//! - Starting and joining the worker threads
//! - Collecting finished items and reporting progress
//! - The second-pass association replication
//! - Closing both repositories once, after the last chunk

use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result, WorkerError};
use crate::job::{AssociationWorkItem, CounterSnapshot, DocumentWorkItem, ItemStatus, JobState};
use crate::pipeline::worker::{aggregate_stats, Worker, WorkerContext};
use crate::reader::build_reader;
use crate::repository::{strip_version_label, Repository};
use crate::writer::{AssociationSummary, AssociationWriter, DocumentWriter};
use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often progress is reported while documents are written
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Success,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => f.write_str("SUCCESS"),
            RunStatus::Error => f.write_str("ERROR"),
        }
    }
}

/// A document that could not be migrated
#[derive(Debug, Clone, Serialize)]
pub struct FailedDocument {
    pub source_id: String,
    pub file_name: Option<String>,
    pub destination: Option<String>,
    pub message: String,
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct MigrationResult {
    /// Final counter values
    pub counters: CounterSnapshot,

    /// SUCCESS iff nothing failed
    pub status: RunStatus,

    /// Time taken for the run
    pub duration: Duration,

    /// Whether the run completed (vs was interrupted)
    pub completed: bool,

    /// Content bytes uploaded
    pub bytes_uploaded: u64,

    pub failed_documents: Vec<FailedDocument>,

    /// Documents that migrated with a warning
    pub warnings: u64,

    pub associations: AssociationSummary,
}

/// Progress information for display
#[derive(Debug, Clone)]
pub struct MigrationProgress {
    pub counters: CounterSnapshot,

    /// Documents queued but not yet read
    pub queued_documents: usize,

    /// Folders waiting to be walked
    pub queued_folders: usize,

    pub bytes_uploaded: u64,

    pub total_workers: usize,

    /// Elapsed time
    pub elapsed: Duration,
}

impl MigrationProgress {
    /// Calculate processed documents per second
    pub fn documents_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.counters.processed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Finished items folded into run totals
#[derive(Debug, Default)]
struct OutcomeCollector {
    /// Source id to target id of documents present in the target
    targets: HashMap<String, String>,
    associations: Vec<AssociationWorkItem>,
    failed: Vec<FailedDocument>,
    warnings: u64,
    bytes: u64,
}

impl OutcomeCollector {
    fn record(&mut self, item: DocumentWorkItem) {
        self.bytes += item.bytes_uploaded;

        match item.status {
            ItemStatus::Success | ItemStatus::Skipped => {
                if item.message.is_some() {
                    self.warnings += 1;
                }
                if let Some(target) = &item.target_ref {
                    self.targets.insert(
                        strip_version_label(&item.source_id).to_string(),
                        target.id.clone(),
                    );
                }
                self.associations.extend(item.associations);
            }
            ItemStatus::Failed => {
                let message = match (item.error, item.message) {
                    (Some(error), Some(note)) => format!("{}; {}", error, note),
                    (Some(error), None) => error,
                    (None, note) => note.unwrap_or_default(),
                };
                self.failed.push(FailedDocument {
                    source_id: item.source_id,
                    file_name: item.file_name,
                    destination: item.destination_folder,
                    message,
                });
            }
            _ => {}
        }
    }
}

/// Coordinates the chunked parallel migration
pub struct MigrationCoordinator {
    /// Configuration
    config: Arc<MigrationConfig>,

    source: Arc<dyn Repository>,
    target: Arc<dyn Repository>,

    /// Worker threads
    workers: Vec<Worker>,

    /// Shutdown signal
    shutdown: Arc<AtomicBool>,
}

impl MigrationCoordinator {
    /// Create a coordinator after checking both repositories are reachable
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn Repository>,
        target: Arc<dyn Repository>,
    ) -> Result<Self> {
        for repo in [&source, &target] {
            if let Err(e) = repo.ping() {
                error!(repository = repo.name(), error = %e, "Repository unreachable");
                return Err(MigrateError::Connectivity {
                    repository: repo.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(Self {
            config: Arc::new(config),
            source,
            target,
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the migration
    pub fn run(self) -> Result<MigrationResult> {
        self.run_with_progress(|_| {})
    }

    /// Run the migration, reporting progress periodically
    ///
    /// Both repositories are closed once the run ends, whether it succeeded
    /// or not.
    pub fn run_with_progress<F>(mut self, on_progress: F) -> Result<MigrationResult>
    where
        F: FnMut(&MigrationProgress),
    {
        let result = self.execute(on_progress);

        self.source.close();
        self.target.close();

        result
    }

    fn execute<F>(&mut self, mut on_progress: F) -> Result<MigrationResult>
    where
        F: FnMut(&MigrationProgress),
    {
        let start_time = Instant::now();

        info!(
            profile = %self.config.profile,
            source = self.source.name(),
            target = self.target.name(),
            threads = self.config.thread_count,
            chunk_size = self.config.chunk_size,
            "Starting migration"
        );

        let (job, reader) = build_reader(
            &self.config,
            Arc::clone(&self.source),
            Arc::clone(&self.target),
        )?;
        let writer = Arc::new(DocumentWriter::new(
            Arc::clone(&self.config),
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            Arc::clone(&job),
        ));

        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        let context = WorkerContext {
            config: Arc::clone(&self.config),
            job: Arc::clone(&job),
            reader,
            writer,
            shutdown: Arc::clone(&self.shutdown),
        };
        let spawned = self.spawn_workers(&context, &outcome_tx);
        drop(outcome_tx);
        drop(context);
        if let Err(e) = spawned {
            self.shutdown.store(true, Ordering::SeqCst);
            self.join_workers();
            return Err(e);
        }

        let mut collector = OutcomeCollector::default();
        let mut last_report = Instant::now();
        loop {
            match outcome_rx.recv_timeout(PROGRESS_INTERVAL) {
                Ok(item) => collector.record(item),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                on_progress(&self.progress(&job, collector.bytes, start_time));
                last_report = Instant::now();
            }
        }

        let interrupted = self.shutdown.load(Ordering::SeqCst);
        if interrupted {
            info!("Shutdown signal received, in-flight chunks finished");
        }

        let (chunks, documents, failures, _, read_errors) = self.join_workers();
        debug!(chunks, documents, failures, read_errors, "Workers joined");
        on_progress(&self.progress(&job, collector.bytes, start_time));

        let associations = if self.config.copy_associations && !interrupted {
            self.write_associations(&job, &mut collector)?
        } else {
            AssociationSummary::default()
        };

        let counters = job.counters().snapshot();
        let status = if counters.failed == 0 {
            RunStatus::Success
        } else {
            RunStatus::Error
        };
        let duration = start_time.elapsed();

        info!(
            status = %status,
            extracted = counters.extracted_docs,
            processed = counters.processed,
            migrated = counters.migrated,
            skipped = counters.skipped,
            failed = counters.failed,
            duration_secs = duration.as_secs(),
            "Migration finished"
        );

        Ok(MigrationResult {
            counters,
            status,
            duration,
            completed: !interrupted,
            bytes_uploaded: collector.bytes,
            failed_documents: collector.failed,
            warnings: collector.warnings,
            associations,
        })
    }

    /// Spawn worker threads
    fn spawn_workers(
        &mut self,
        context: &WorkerContext,
        outcomes: &crossbeam_channel::Sender<DocumentWorkItem>,
    ) -> Result<()> {
        for id in 0..self.config.thread_count {
            let worker = Worker::spawn(id, context.clone(), outcomes.clone())?;
            self.workers.push(worker);
        }

        info!(count = self.workers.len(), "Workers spawned");
        Ok(())
    }

    /// Join all worker threads and collect final stats
    fn join_workers(&mut self) -> (u64, u64, u64, u64, u64) {
        for worker in &mut self.workers {
            if let Err(e) = worker.join() {
                warn!(error = %e, "Worker failed to join cleanly");
            }
            debug!(
                worker = worker.id(),
                chunks = worker.stats().chunks.load(Ordering::Relaxed),
                documents = worker.stats().documents.load(Ordering::Relaxed),
                "Worker finished"
            );
        }

        let stats = aggregate_stats(&self.workers);
        self.workers.clear();
        stats
    }

    fn progress(&self, job: &JobState, bytes: u64, start_time: Instant) -> MigrationProgress {
        let (queued_documents, queued_folders) = job.queue_sizes();
        MigrationProgress {
            counters: job.counters().snapshot(),
            queued_documents,
            queued_folders,
            bytes_uploaded: bytes,
            total_workers: self.config.thread_count,
            elapsed: start_time.elapsed(),
        }
    }

    /// Replicate staged relationships with the same number of threads
    fn write_associations(
        &self,
        job: &Arc<JobState>,
        collector: &mut OutcomeCollector,
    ) -> Result<AssociationSummary> {
        let items = &mut collector.associations;
        if items.is_empty() {
            return Ok(AssociationSummary::default());
        }

        info!(associations = items.len(), "Writing associations");
        let writer = AssociationWriter::new(Arc::clone(&self.target), Arc::clone(job));
        let targets = &collector.targets;
        let chunk_size = self.config.chunk_size;
        let per_thread = items.len().div_ceil(self.config.thread_count);

        thread::scope(|scope| {
            let mut handles = Vec::new();
            for (id, group) in items.chunks_mut(per_thread).enumerate() {
                let writer = &writer;
                let handle = thread::Builder::new()
                    .name(format!("associate-{}", id))
                    .spawn_scoped(scope, move || {
                        let mut summary = AssociationSummary::default();
                        for chunk in group.chunks_mut(chunk_size) {
                            summary.merge(&writer.write_chunk(id, chunk, targets));
                        }
                        summary
                    })
                    .map_err(|e| WorkerError::InitFailed {
                        id,
                        reason: e.to_string(),
                    })?;
                handles.push((id, handle));
            }

            let mut total = AssociationSummary::default();
            for (id, handle) in handles {
                let summary = handle.join().map_err(|_| WorkerError::Panicked {
                    id,
                    message: "Association thread panicked".into(),
                })?;
                total.merge(&summary);
            }
            Ok(total)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TargetRef;

    #[test]
    fn test_migration_progress_rate() {
        let progress = MigrationProgress {
            counters: CounterSnapshot {
                processed: 500,
                ..CounterSnapshot::default()
            },
            queued_documents: 10,
            queued_folders: 2,
            bytes_uploaded: 1024,
            total_workers: 4,
            elapsed: Duration::from_secs(10),
        };

        assert!((progress.documents_per_second() - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_collector_builds_target_map() {
        let mut collector = OutcomeCollector::default();

        let mut migrated = DocumentWorkItem::new("src-1");
        migrated.status = ItemStatus::Success;
        migrated.bytes_uploaded = 10;
        migrated.target_ref = Some(TargetRef {
            id: "tgt-1".into(),
            version_label: "1.0".into(),
        });
        migrated.associations.push(AssociationWorkItem::new("src-1", "src-2", "R:cm:references"));
        collector.record(migrated);

        let mut failed = DocumentWorkItem::new("src-2");
        failed.fail("upload refused");
        failed.associations.push(AssociationWorkItem::new("src-2", "src-1", "R:cm:references"));
        collector.record(failed);

        assert_eq!(collector.targets.get("src-1").map(String::as_str), Some("tgt-1"));
        assert_eq!(collector.associations.len(), 1);
        assert_eq!(collector.failed[0].message, "upload refused");
        assert_eq!(collector.bytes, 10);
    }
}
