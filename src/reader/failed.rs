//! Retry of previously failed documents

use crate::error::{ConfigError, Result};
use crate::job::{DocumentWorkItem, JobState};
use crate::reader::ItemReader;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Replays a list of source ids
pub struct FailedListReader {
    job: Arc<JobState>,
}

impl FailedListReader {
    /// Queue every id up front
    pub fn from_ids(ids: Vec<String>, job: Arc<JobState>) -> Self {
        info!(documents = ids.len(), "Retrying failed documents");
        job.enqueue_documents(ids.into_iter().map(DocumentWorkItem::new));
        Self { job }
    }

    /// Read ids from a file, one per line; blank lines and `#` comments are ignored
    pub fn from_file(path: &Path, job: Arc<JobState>) -> std::result::Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFailedList {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_ids(parse_ids(&text), job))
    }
}

fn parse_ids(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

impl ItemReader for FailedListReader {
    fn read(&self) -> Result<Option<DocumentWorkItem>> {
        Ok(self.job.poll_next_document())
    }
}
