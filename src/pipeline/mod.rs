//! Chunked parallel execution
//!
//! The coordinator owns the run; workers pull chunks through the shared
//! reader and push finished items back over a channel.

pub mod coordinator;
pub mod worker;

pub use coordinator::{FailedDocument, MigrationCoordinator, MigrationProgress, MigrationResult, RunStatus};
pub use worker::{Worker, WorkerContext, WorkerStats};
