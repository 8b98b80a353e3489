//! Delete-on-failure scope for a single document
//!
//! The target repository has no multi-document transactions, so a document
//! whose upload sequence fails halfway is compensated by deleting whatever
//! node was created for it. The scope must end with [`RollbackScope::commit`]
//! or [`RollbackScope::rollback`]; dropping it while armed (a panic while
//! uploading) still deletes the partial document.

use crate::error::DocumentError;
use crate::repository::{strip_version_label, Repository};
use tracing::{debug, error, warn};

/// Tracks the target node written for one document
pub struct RollbackScope<'a> {
    target: &'a dyn Repository,
    document: Option<String>,
    armed: bool,
}

impl<'a> RollbackScope<'a> {
    pub fn new(target: &'a dyn Repository) -> Self {
        Self {
            target,
            document: None,
            armed: true,
        }
    }

    /// Remember the node created by the first write
    pub fn track(&mut self, target_id: &str) {
        self.document = Some(strip_version_label(target_id).to_string());
    }

    /// The document was written and validated
    pub fn commit(mut self) {
        self.armed = false;
    }

    /// Delete the tracked node and return the error to record
    ///
    /// A failed delete is merged into the returned error.
    pub fn rollback(mut self, cause: DocumentError) -> DocumentError {
        self.armed = false;

        let Some(id) = self.document.take() else {
            debug!(error = %cause, "Nothing written for document, no rollback needed");
            return cause;
        };

        match self.target.delete_object(&id) {
            Ok(()) => {
                warn!(document = %id, error = %cause, "Partially migrated document deleted");
                cause
            }
            Err(rollback) => DocumentError::Rollback {
                id,
                cause: Box::new(cause),
                rollback,
            },
        }
    }
}

impl Drop for RollbackScope<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(id) = self.document.take() {
            warn!(document = %id, "Document processing abandoned, deleting partial upload");
            if let Err(e) = self.target.delete_object(&id) {
                error!(document = %id, error = %e, "Unable to delete abandoned document");
            }
        }
    }
}
