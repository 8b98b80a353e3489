//! Read side of the pipeline
//!
//! A reader hands out one document work item at a time. All readers feed the
//! same [`JobState`]: when its document queue is empty they fetch more work
//! from the source repository while holding the job state lock, so concurrent
//! workers never fetch the same page twice.
//!
//! Strategies, selected by profile:
//! - [`FolderReader`]: lazy paged walk of a folder tree
//! - [`QueryReader`]: paged document query
//! - [`FailedListReader`]: source ids from a previous run's failure list

pub mod failed;
pub mod folder;
pub mod query;

pub use failed::FailedListReader;
pub use folder::FolderReader;
pub use query::QueryReader;

use crate::config::{MigrationConfig, Profile};
use crate::error::{RepositoryError, Result};
use crate::job::{DocumentWorkItem, JobState};
use crate::repository::{FolderRef, ObjectKind, Repository};
use std::sync::Arc;
use tracing::info;

/// Source of document work items
pub trait ItemReader: Send + Sync {
    /// Next document to migrate, `None` once the source is exhausted
    ///
    /// An error reports a unit of work that could not be read (a folder page,
    /// a query page); the reader has moved past it and can be called again.
    fn read(&self) -> Result<Option<DocumentWorkItem>>;
}

/// Build the job state and the reader for the configured profile
pub fn build_reader(
    config: &Arc<MigrationConfig>,
    source: Arc<dyn Repository>,
    target: Arc<dyn Repository>,
) -> Result<(Arc<JobState>, Arc<dyn ItemReader>)> {
    match config.profile {
        Profile::Folder => {
            let start = source
                .get_by_path(&config.source_folder)?
                .ok_or_else(|| RepositoryError::NotFound {
                    what: config.source_folder.clone(),
                })?;
            if start.kind != ObjectKind::Folder {
                return Err(RepositoryError::NotAFolder { path: start.path }.into());
            }

            info!(folder = %start.path, "Reading documents from folder tree");
            let job = Arc::new(JobState::new(
                Some(FolderRef::from(&start)),
                &config.excluded_folders,
            ));
            let reader = FolderReader::new(Arc::clone(config), source, target, Arc::clone(&job));
            Ok((job, Arc::new(reader)))
        }
        Profile::Query => {
            let query = config.query.clone().unwrap_or_default();
            info!(query = %query, "Reading documents from query");
            let job = Arc::new(JobState::new(None, &config.excluded_folders));
            let reader = QueryReader::new(source, Arc::clone(&job), query, config.page_size);
            Ok((job, Arc::new(reader)))
        }
        Profile::Failed => {
            let job = Arc::new(JobState::new(None, &config.excluded_folders));
            let reader = match &config.failed_list {
                Some(path) => FailedListReader::from_file(path, Arc::clone(&job))?,
                None => FailedListReader::from_ids(Vec::new(), Arc::clone(&job)),
            };
            Ok((job, Arc::new(reader)))
        }
    }
}
