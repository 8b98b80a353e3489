//! Paged document query

use crate::error::Result;
use crate::job::{DocumentWorkItem, JobState};
use crate::reader::ItemReader;
use crate::repository::{parent_path, RepoObject, Repository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads documents page by page from a repository query
pub struct QueryReader {
    source: Arc<dyn Repository>,
    job: Arc<JobState>,
    query: String,
    page_size: usize,
    exhausted: AtomicBool,
}

impl QueryReader {
    pub fn new(source: Arc<dyn Repository>, job: Arc<JobState>, query: String, page_size: usize) -> Self {
        Self {
            source,
            job,
            query,
            page_size,
            exhausted: AtomicBool::new(false),
        }
    }

    /// Check whether any folder on the document's path is excluded
    fn in_excluded_folder(&self, doc: &RepoObject) -> bool {
        parent_path(&doc.path)
            .split('/')
            .filter(|segment| !segment.is_empty())
            .any(|segment| self.job.is_excluded(segment))
    }
}

impl ItemReader for QueryReader {
    fn read(&self) -> Result<Option<DocumentWorkItem>> {
        let mut state = self.job.lock();
        loop {
            if let Some(item) = state.poll_next_document() {
                return Ok(Some(item));
            }
            if self.exhausted.load(Ordering::Acquire) {
                return Ok(None);
            }

            let page = state.counters().page_index() as usize;
            let results = match self.source.query(&self.query, page, self.page_size) {
                Ok(results) => results,
                Err(e) => {
                    warn!(query = %self.query, page, error = %e, "Query failed, no more documents will be read");
                    self.exhausted.store(true, Ordering::Release);
                    return Err(e.into());
                }
            };

            if results.len() < self.page_size {
                self.exhausted.store(true, Ordering::Release);
            }
            state.counters().increase_page_index();
            debug!(page, results = results.len(), "Query page fetched");

            let documents: Vec<DocumentWorkItem> = results
                .into_iter()
                .filter(|doc| !doc.is_working_copy() && !self.in_excluded_folder(doc))
                .map(|doc| DocumentWorkItem::new(doc.id))
                .collect();
            state.enqueue_documents(documents);
        }
    }
}
