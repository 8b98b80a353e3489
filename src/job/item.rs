//! Work items threaded through read, process and write

use crate::repository::{join_path, Metadata};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Processing status shared by document and association items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    Pending,
    Skipped,
    Replace,
    Success,
    Failed,
    /// Relationship types that are never replicated
    Excluded,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemStatus::Pending => "PENDING",
            ItemStatus::Skipped => "SKIPPED",
            ItemStatus::Replace => "REPLACE",
            ItemStatus::Success => "SUCCESS",
            ItemStatus::Failed => "FAILED",
            ItemStatus::Excluded => "EXCLUDED",
        };
        f.write_str(name)
    }
}

/// Document in the target repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetRef {
    pub id: String,

    /// Label recorded when the document was written
    pub version_label: String,
}

/// Transformed properties, ready to push
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentProperties {
    /// Type, aspects and scalar properties
    pub metadata: Metadata,

    /// Multi-valued properties, keyed by prefixed name
    pub collections: BTreeMap<String, Vec<String>>,
}

/// Migration state of one source document
#[derive(Debug, Clone)]
pub struct DocumentWorkItem {
    pub source_id: String,

    /// Destination folder, pre-supplied by the folder traversal
    pub destination_folder: Option<String>,

    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub creator: Option<String>,
    pub modifier: Option<String>,

    pub status: ItemStatus,

    /// Warnings and post-migration notes
    pub message: Option<String>,

    /// Failure cause
    pub error: Option<String>,

    pub target_ref: Option<TargetRef>,
    pub version_label: Option<String>,
    pub version_count: usize,

    /// A previous target document was deleted to make room for this one
    pub replaced: bool,

    pub bytes_uploaded: u64,
    pub associations: Vec<AssociationWorkItem>,

    /// Current-version properties, dropped once the outcome is recorded
    pub properties: Option<DocumentProperties>,
}

impl DocumentWorkItem {
    /// Bare item carrying only the source id
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            destination_folder: None,
            file_name: None,
            content_type: None,
            created: None,
            modified: None,
            creator: None,
            modifier: None,
            status: ItemStatus::Pending,
            message: None,
            error: None,
            target_ref: None,
            version_label: None,
            version_count: 0,
            replaced: false,
            bytes_uploaded: 0,
            associations: Vec::new(),
            properties: None,
        }
    }

    /// Item whose destination was already resolved by the traversal
    pub fn with_destination(source_id: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            destination_folder: Some(destination.into()),
            ..Self::new(source_id)
        }
    }

    /// Full target path, once name and destination are known
    pub fn target_path(&self) -> Option<String> {
        match (&self.destination_folder, &self.file_name) {
            (Some(folder), Some(name)) => Some(join_path(folder, name)),
            _ => None,
        }
    }

    /// Append a note to the item message
    pub fn add_message(&mut self, note: impl AsRef<str>) {
        let note = note.as_ref();
        self.message = Some(match self.message.take() {
            Some(existing) => format!("{}; {}", existing, note),
            None => note.to_string(),
        });
    }

    /// Record a failure
    pub fn fail(&mut self, error: impl ToString) {
        self.status = ItemStatus::Failed;
        self.error = Some(error.to_string());
    }

    pub fn is_failed(&self) -> bool {
        self.status == ItemStatus::Failed
    }

    /// Drop the property bag once it is no longer needed
    pub fn release_properties(&mut self) {
        self.properties = None;
    }
}

/// Relationship to replicate in the second pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssociationWorkItem {
    pub source_from_id: String,
    pub source_to_id: String,
    pub target_from_id: Option<String>,
    pub target_to_id: Option<String>,
    pub relation_type: String,
    pub status: ItemStatus,
    pub message: Option<String>,
}

impl AssociationWorkItem {
    pub fn new(
        source_from_id: impl Into<String>,
        source_to_id: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            source_from_id: source_from_id.into(),
            source_to_id: source_to_id.into(),
            target_from_id: None,
            target_to_id: None,
            relation_type: relation_type.into(),
            status: ItemStatus::Pending,
            message: None,
        }
    }
}
