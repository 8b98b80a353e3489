//! doc-migrator - Document migration between content repositories
//!
//! Copies documents with their content, metadata, version history and
//! relationships from a source repository to a target repository, either
//! mirroring the source folder tree or computing destinations from rules.
//!
//! # Features
//!
//! - **Lazy Paged Traversal**: folders are listed one page at a time, so a
//!   run never holds more than a few pages of work in memory.
//!
//! - **Chunked Parallel Writes**: a fixed pool of worker threads each writes
//!   bounded chunks of documents; only reading is serialized.
//!
//! - **Ordered Version History**: versions of one document are uploaded
//!   oldest to newest on a single target node.
//!
//! - **Rollback**: a document whose upload sequence fails halfway is deleted
//!   from the target, so no partially versioned document is left behind.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Source Repository                           │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ list_children / query
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Job State (single mutex)                          │
//! │   document queue · folder queue · current folder · counters      │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ chunk of N documents
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Worker Threads                              │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐     │
//! │  │Worker 1 │  │Worker 2 │  │Worker 3 │  ...    │Worker T │     │
//! │  │ writer  │  │ writer  │  │ writer  │         │ writer  │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! │       └────────────┴─────┬──────┴────────────────────┘          │
//! │                          │ finished items (crossbeam)           │
//! │                          ▼                                      │
//! │            ┌──────────────────────────┐                         │
//! │            │      Coordinator         │                         │
//! │            │  - outcomes, progress    │                         │
//! │            │  - association pass      │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────┐
//!                    │Target Repository │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Mirror a folder tree with full version history
//! doc-migrator ./export ./import --source-folder /Sites --all-versions -t 8
//!
//! # Retry the documents that failed last time
//! doc-migrator ./export ./import --profile failed --failed-list failed.txt
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod reader;
pub mod repository;
pub mod writer;

pub use config::{CliArgs, MigrationConfig, Profile, SourceAction};
pub use error::{MigrateError, Result};
pub use pipeline::{MigrationCoordinator, MigrationResult, RunStatus};
pub use repository::{FsRepository, MemoryRepository, Repository};
