//! Value types exchanged with repository collaborators

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Namespace URI of the content model
pub const CONTENT_MODEL_URI: &str = "http://www.alfresco.org/model/content/1.0";

/// Document name property
pub const PROP_NAME: &str = "{http://www.alfresco.org/model/content/1.0}name";

/// Creation timestamp property
pub const PROP_CREATED: &str = "{http://www.alfresco.org/model/content/1.0}created";

/// Creator property
pub const PROP_CREATOR: &str = "{http://www.alfresco.org/model/content/1.0}creator";

/// Last modification timestamp property
pub const PROP_MODIFIED: &str = "{http://www.alfresco.org/model/content/1.0}modified";

/// Last modifier property
pub const PROP_MODIFIER: &str = "{http://www.alfresco.org/model/content/1.0}modifier";

/// Type assigned to documents created without explicit metadata
pub const DEFAULT_CONTENT_TYPE: &str = "cm:content";

/// Identifier suffix of checked-out private working copies
pub const WORKING_COPY_SUFFIX: &str = ";pwc";

/// Relation linking a working copy to its original
pub const ASSOC_WORKING_COPY_LINK: &str = "R:cm:workingcopylink";

/// Relation linking an original to its working copy
pub const ASSOC_ORIGINAL: &str = "R:cm:original";

/// Kind of repository object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Folder,
    Document,
    Other,
}

/// An object as reported by a repository lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoObject {
    /// Repository identifier (without version label)
    pub id: String,

    /// Object name (last path segment)
    pub name: String,

    /// Full repository path
    pub path: String,

    /// Object kind
    pub kind: ObjectKind,

    /// Current version label, documents only
    pub version_label: Option<String>,
}

impl RepoObject {
    /// Check if this object is a checked-out working copy
    pub fn is_working_copy(&self) -> bool {
        is_working_copy(&self.id)
    }

    /// Path of the containing folder
    pub fn parent_path(&self) -> String {
        parent_path(&self.path)
    }
}

/// Handle to a source folder, used only by the traversal producer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderRef {
    pub id: String,
    pub path: String,
    pub name: String,
}

impl From<&RepoObject> for FolderRef {
    fn from(obj: &RepoObject) -> Self {
        Self {
            id: obj.id.clone(),
            path: obj.path.clone(),
            name: obj.name.clone(),
        }
    }
}

/// One page of a folder listing, partitioned by object kind
#[derive(Debug, Clone, Default)]
pub struct FolderPage {
    pub folders: Vec<FolderRef>,

    /// Documents in listing order, working copies included
    pub documents: Vec<RepoObject>,

    pub others: Vec<RepoObject>,
}

impl FolderPage {
    /// Partition a raw listing
    pub fn from_children(children: impl IntoIterator<Item = RepoObject>) -> Self {
        let mut page = FolderPage::default();
        for child in children {
            match child.kind {
                ObjectKind::Folder => page.folders.push(FolderRef::from(&child)),
                ObjectKind::Document => page.documents.push(child),
                ObjectKind::Other => page.others.push(child),
            }
        }
        page
    }

    /// A page with neither sub-folders nor documents ends the folder
    pub fn is_drained(&self) -> bool {
        self.folders.is_empty() && self.documents.is_empty()
    }
}

/// Document type, aspects and flat property bag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Identifier of the node (or version node) the metadata was read from
    pub id: String,

    /// Content type
    #[serde(rename = "type")]
    pub type_id: String,

    #[serde(default)]
    pub aspects: Vec<String>,

    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Metadata {
    /// Get a property as a string, `None` for missing, null or non-string values
    pub fn string_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }
}

/// Entry of a document's version history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// Reference usable with `get_metadata`/`get_content`
    pub version_ref: String,
    pub label: String,
}

/// A typed relationship between two documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
}

/// Access control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub authority: String,
    pub role: String,
}

/// Access control list of an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Whether permissions are inherited from the parent
    pub inherited: bool,

    /// Entries set directly on the object
    #[serde(default)]
    pub direct: Vec<PermissionEntry>,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            inherited: true,
            direct: Vec::new(),
        }
    }
}

/// Binary payload for a document creation or a new version
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub content: &'a [u8],
}

/// Check if an identifier belongs to a private working copy
pub fn is_working_copy(id: &str) -> bool {
    id.ends_with(WORKING_COPY_SUFFIX)
}

/// Strip a trailing `;label` from an identifier
pub fn strip_version_label(id: &str) -> &str {
    match id.rfind(';') {
        Some(idx) => &id[..idx],
        None => id,
    }
}

/// Check if a label's minor component is zero ("2.0", "11.0")
pub fn is_major_label(label: &str) -> bool {
    label.ends_with(".0")
}

/// Label the repository assigns to the version following `current`
pub fn next_version_label(current: &str, major: bool) -> String {
    let (major_part, minor_part) = current.split_once('.').unwrap_or((current, "0"));
    let major_num: u32 = major_part.parse().unwrap_or(1);
    let minor_num: u32 = minor_part.parse().unwrap_or(0);

    if major {
        format!("{}.0", major_num + 1)
    } else {
        format!("{}.{}", major_num, minor_num + 1)
    }
}

/// Join a folder path and a child name or sub-path
///
/// An empty base stands for the repository root.
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');

    match (base.is_empty(), child.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", child),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, child),
    }
}

/// Parent folder of a path, "/" for top-level objects
pub fn parent_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
    }
}

/// Last segment of a path
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "/"), "/");
        assert_eq!(join_path("", "/a/b"), "/a/b");
        assert_eq!(join_path("/Migrated", "/"), "/Migrated");
        assert_eq!(join_path("/Migrated", "/a"), "/Migrated/a");
        assert_eq!(join_path("/", "doc.txt"), "/doc.txt");
        assert_eq!(join_path("/root/a", "doc.txt"), "/root/a/doc.txt");
    }

    #[test]
    fn test_parent_and_base_name() {
        assert_eq!(parent_path("/a/b/doc.txt"), "/a/b");
        assert_eq!(parent_path("/doc.txt"), "/");
        assert_eq!(parent_path("/"), "/");
        assert_eq!(base_name("/a/b/doc.txt"), "doc.txt");
        assert_eq!(base_name("/a/b/"), "b");
    }

    #[test]
    fn test_version_labels() {
        assert!(is_major_label("1.0"));
        assert!(is_major_label("2.0"));
        assert!(!is_major_label("1.1"));
        assert!(!is_major_label("1.10"));

        assert_eq!(next_version_label("1.0", false), "1.1");
        assert_eq!(next_version_label("1.1", true), "2.0");
        assert_eq!(next_version_label("1.9", false), "1.10");
    }

    #[test]
    fn test_identifier_helpers() {
        assert!(is_working_copy("abc;pwc"));
        assert!(!is_working_copy("abc"));
        assert_eq!(strip_version_label("abc;1.1"), "abc");
        assert_eq!(strip_version_label("abc"), "abc");
    }

    #[test]
    fn test_page_partition() {
        let obj = |name: &str, kind| RepoObject {
            id: name.to_string(),
            name: name.to_string(),
            path: format!("/{}", name),
            kind,
            version_label: None,
        };
        let page = FolderPage::from_children(vec![
            obj("f", ObjectKind::Folder),
            obj("d", ObjectKind::Document),
            obj("l", ObjectKind::Other),
        ]);

        assert_eq!(page.folders.len(), 1);
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.others.len(), 1);
        assert!(!page.is_drained());
        assert!(FolderPage::from_children(vec![obj("l", ObjectKind::Other)]).is_drained());
    }
}
