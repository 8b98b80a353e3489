//! Lazy folder tree walk
//!
//! The walk keeps a single cursor: the folder currently being paged and the
//! page index inside it. When the document queue runs dry, the next page of
//! the current folder is fetched; sub-folders go to the pending folder queue
//! and documents to the document queue. A page with neither ends the folder:
//! its mirror is created in the target and the cursor advances. Long runs of
//! empty folders are handled by the loop in [`FolderReader::fill_next_page`],
//! never by recursion.

use crate::config::MigrationConfig;
use crate::error::{RepoResult, Result};
use crate::job::{DocumentWorkItem, JobState, JobStateGuard};
use crate::reader::ItemReader;
use crate::repository::{ensure_folder, join_path, FolderRef, RepoObject, Repository};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Paged walk of the source folder tree
pub struct FolderReader {
    config: Arc<MigrationConfig>,
    source: Arc<dyn Repository>,
    target: Arc<dyn Repository>,
    job: Arc<JobState>,
}

impl FolderReader {
    pub fn new(
        config: Arc<MigrationConfig>,
        source: Arc<dyn Repository>,
        target: Arc<dyn Repository>,
        job: Arc<JobState>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            job,
        }
    }

    /// Fetch pages until something was queued or the walk is over
    ///
    /// Returns false once there is no current folder left.
    fn fill_next_page(&self, state: &mut JobStateGuard<'_>) -> Result<bool> {
        loop {
            let Some(folder) = state.current_folder().cloned() else {
                return Ok(false);
            };
            let page_index = state.counters().page_index() as usize;

            let page = match self.source.list_children(
                &folder.path,
                page_index,
                self.config.page_size,
                self.config.folders_only,
            ) {
                Ok(page) => page,
                Err(e) => {
                    warn!(folder = %folder.path, page = page_index, error = %e, "Unable to list folder, skipping it");
                    state.advance_to_next_folder();
                    return Err(e.into());
                }
            };

            if page.is_drained() {
                let mirrored = self.mirror_folder(&folder);
                state.advance_to_next_folder();
                if let Err(e) = mirrored {
                    warn!(folder = %folder.path, error = %e, "Unable to create target folder");
                    return Err(e.into());
                }
                continue;
            }

            trace!(
                folder = %folder.path,
                page = page_index,
                folders = page.folders.len(),
                documents = page.documents.len(),
                others = page.others.len(),
                "Folder page fetched"
            );

            let documents: Vec<DocumentWorkItem> = page
                .documents
                .into_iter()
                .filter(|doc| {
                    if doc.is_working_copy() {
                        debug!(document = %doc.id, "Working copy skipped");
                        return false;
                    }
                    true
                })
                .map(|doc| self.work_item(&folder, doc))
                .collect();

            state.enqueue_folders(page.folders);
            state.enqueue_documents(documents);
            state.counters().increase_page_index();
            return Ok(true);
        }
    }

    /// Documents carry their mirrored folder unless rules decide placement
    fn work_item(&self, folder: &FolderRef, doc: RepoObject) -> DocumentWorkItem {
        if self.config.rules.is_empty() {
            DocumentWorkItem::with_destination(doc.id, self.mirror_path(folder))
        } else {
            DocumentWorkItem::new(doc.id)
        }
    }

    fn mirror_path(&self, folder: &FolderRef) -> String {
        join_path(&self.config.target_root, &folder.path)
    }

    /// Create the target counterpart of a drained folder
    fn mirror_folder(&self, folder: &FolderRef) -> RepoResult<()> {
        let path = self.mirror_path(folder);
        let created = ensure_folder(self.target.as_ref(), &path)?;
        debug!(source = %folder.path, target = %created.path, "Folder mirrored");

        if self.config.copy_permissions {
            let permissions = self.source.get_permissions(&folder.id)?;
            if !permissions.direct.is_empty() || !permissions.inherited {
                self.target.set_permissions(&created.id, &permissions)?;
            }
        }
        Ok(())
    }
}

impl ItemReader for FolderReader {
    fn read(&self) -> Result<Option<DocumentWorkItem>> {
        let mut state = self.job.lock();
        loop {
            if let Some(item) = state.poll_next_document() {
                return Ok(Some(item));
            }
            if !self.fill_next_page(&mut state)? {
                return Ok(None);
            }
        }
    }
}
