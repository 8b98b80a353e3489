//! Shared job state
//!
//! One instance per run holds the document queue, the pending folder queue,
//! the folder currently being paged and the run counters. Every mutator takes
//! the same lock, so a reader deciding "the queue is empty, fetch a new page"
//! sees a consistent snapshot. Producers that need several steps under one
//! lock use [`JobState::lock`].

use crate::job::counter::{CounterKind, Counters};
use crate::job::item::DocumentWorkItem;
use crate::repository::FolderRef;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use tracing::info;

#[derive(Debug, Default)]
struct QueueState {
    documents: VecDeque<DocumentWorkItem>,
    folders: VecDeque<FolderRef>,
    current_folder: Option<FolderRef>,
}

/// Queues and cursor shared by all readers of a run
#[derive(Debug)]
pub struct JobState {
    queues: Mutex<QueueState>,
    counters: Counters,
    /// Lower-cased folder names never traversed
    excluded_folders: Vec<String>,
}

impl JobState {
    /// Create a job state, optionally positioned on a start folder
    pub fn new(start_folder: Option<FolderRef>, excluded_folders: &[String]) -> Self {
        Self {
            queues: Mutex::new(QueueState {
                current_folder: start_folder,
                ..QueueState::default()
            }),
            counters: Counters::new(),
            excluded_folders: excluded_folders.iter().map(|f| f.to_lowercase()).collect(),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Check a folder name against the exclusion list (case-insensitive)
    pub fn is_excluded(&self, folder_name: &str) -> bool {
        let name = folder_name.to_lowercase();
        self.excluded_folders.iter().any(|excluded| *excluded == name)
    }

    /// Hold the lock across a multi-step producer operation
    pub fn lock(&self) -> JobStateGuard<'_> {
        JobStateGuard {
            queues: self.queues.lock(),
            job: self,
        }
    }

    pub fn poll_next_document(&self) -> Option<DocumentWorkItem> {
        self.lock().poll_next_document()
    }

    pub fn poll_next_folder(&self) -> Option<FolderRef> {
        self.lock().poll_next_folder()
    }

    pub fn enqueue_folders(&self, batch: impl IntoIterator<Item = FolderRef>) {
        self.lock().enqueue_folders(batch)
    }

    pub fn enqueue_documents(&self, batch: impl IntoIterator<Item = DocumentWorkItem>) {
        self.lock().enqueue_documents(batch)
    }

    pub fn advance_to_next_folder(&self) -> Option<FolderRef> {
        self.lock().advance_to_next_folder()
    }

    pub fn current_folder(&self) -> Option<FolderRef> {
        self.lock().current_folder().cloned()
    }

    /// Nothing queued and no folder left to page
    pub fn is_finished(&self) -> bool {
        let guard = self.lock();
        guard.current_folder().is_none() && !guard.has_documents() && !guard.has_folders()
    }

    /// Number of queued documents and folders
    pub fn queue_sizes(&self) -> (usize, usize) {
        let guard = self.lock();
        (guard.queues.documents.len(), guard.queues.folders.len())
    }
}

/// Exclusive access to the job state queues
pub struct JobStateGuard<'a> {
    queues: MutexGuard<'a, QueueState>,
    job: &'a JobState,
}

impl JobStateGuard<'_> {
    /// Remove the head of the document queue
    pub fn poll_next_document(&mut self) -> Option<DocumentWorkItem> {
        let item = self.queues.documents.pop_front()?;
        self.job.counters.increment(CounterKind::ExtractedDocs);
        Some(item)
    }

    /// Remove the head of the folder queue, skipping excluded folders
    pub fn poll_next_folder(&mut self) -> Option<FolderRef> {
        while let Some(folder) = self.queues.folders.pop_front() {
            if self.job.is_excluded(&folder.name) {
                info!(folder = %folder.path, "Folder excluded from traversal");
                continue;
            }
            return Some(folder);
        }
        None
    }

    pub fn enqueue_folders(&mut self, batch: impl IntoIterator<Item = FolderRef>) {
        self.queues.folders.extend(batch);
    }

    pub fn enqueue_documents(&mut self, batch: impl IntoIterator<Item = DocumentWorkItem>) {
        self.queues.documents.extend(batch);
    }

    /// Reset the page cursor and move to the next pending folder
    pub fn advance_to_next_folder(&mut self) -> Option<FolderRef> {
        self.job.counters.reset_page_index();
        self.queues.current_folder = self.poll_next_folder();
        self.queues.current_folder.clone()
    }

    pub fn current_folder(&self) -> Option<&FolderRef> {
        self.queues.current_folder.as_ref()
    }

    pub fn has_documents(&self) -> bool {
        !self.queues.documents.is_empty()
    }

    pub fn has_folders(&self) -> bool {
        !self.queues.folders.is_empty()
    }

    pub fn counters(&self) -> &Counters {
        &self.job.counters
    }
}
