//! Repository collaborators
//!
//! The pipeline talks to the source and target repositories only through the
//! [`Repository`] trait. Two implementations ship with the crate:
//!
//! - [`MemoryRepository`]: in-process store with fault injection, used by
//!   the tests
//! - [`FsRepository`]: repository rooted at a local directory, metadata kept
//!   in JSON sidecar files

pub mod fs;
pub mod memory;
pub mod types;

pub use fs::FsRepository;
pub use memory::{MemoryRepository, PathSkew};
pub use types::*;

use crate::error::{RepoResult, RepositoryError};
use std::collections::BTreeMap;
use tracing::debug;

/// Operations the migration core needs from a content repository
///
/// Implementations must be safe to share between worker threads. Retries
/// and connection pooling are the implementation's concern.
pub trait Repository: Send + Sync {
    /// Display name used in logs and errors
    fn name(&self) -> &str;

    /// Verify that a session can be established
    fn ping(&self) -> RepoResult<()>;

    /// List one page of a folder's children
    ///
    /// `page` is a page index; the first child returned is at
    /// `page * page_size`. With `skip_documents` set, only non-document
    /// children are listed and paged.
    fn list_children(
        &self,
        folder_path: &str,
        page: usize,
        page_size: usize,
        skip_documents: bool,
    ) -> RepoResult<FolderPage>;

    /// Run a document query, one page at a time
    fn query(&self, query: &str, page: usize, page_size: usize) -> RepoResult<Vec<RepoObject>>;

    /// Resolve an object by path
    fn get_by_path(&self, path: &str) -> RepoResult<Option<RepoObject>>;

    /// Resolve an object by id (a version label suffix is ignored)
    fn get_by_id(&self, id: &str) -> RepoResult<Option<RepoObject>>;

    /// Create a folder; fails with `AlreadyExists` if the name is taken
    fn create_folder(&self, parent_path: &str, name: &str) -> RepoResult<RepoObject>;

    /// Create a document with its first version (label 1.0)
    fn create_document(&self, folder_path: &str, upload: &Upload<'_>) -> RepoResult<RepoObject>;

    /// Upload a new version of an existing document
    fn update_version(&self, id: &str, upload: &Upload<'_>, major: bool) -> RepoResult<RepoObject>;

    fn delete_object(&self, id: &str) -> RepoResult<()>;

    fn move_object(&self, id: &str, destination_folder: &str) -> RepoResult<()>;

    /// Create a relationship; fails with `AlreadyExists` if present
    fn create_relationship(&self, from_id: &str, to_id: &str, relation_type: &str) -> RepoResult<()>;

    /// Relationships where the document is the source
    fn relationships(&self, id: &str) -> RepoResult<Vec<Relationship>>;

    /// Read metadata of a document, or of one of its versions
    fn get_metadata(&self, id: &str, version_ref: Option<&str>) -> RepoResult<Metadata>;

    /// Push type, aspects and scalar properties onto a document
    fn update_properties(&self, id: &str, metadata: &Metadata) -> RepoResult<()>;

    /// Push multi-valued properties onto a document
    fn update_collections(
        &self,
        id: &str,
        collections: &BTreeMap<String, Vec<String>>,
    ) -> RepoResult<()>;

    /// Version history, newest first
    fn get_version_list(&self, id: &str) -> RepoResult<Vec<VersionEntry>>;

    /// Read the content of a document, or of one of its versions
    fn get_content(&self, id: &str, version_ref: Option<&str>) -> RepoResult<Vec<u8>>;

    fn get_permissions(&self, id: &str) -> RepoResult<Permissions>;

    /// Replace the direct entries and the inheritance flag of an object
    fn set_permissions(&self, id: &str, permissions: &Permissions) -> RepoResult<()>;

    /// Release pooled resources; called once after the last chunk
    fn close(&self) {}
}

/// Make sure a folder exists at `path`, creating missing parents
///
/// Calling it twice with the same path yields the same folder. A concurrent
/// creation reported as `AlreadyExists` is resolved by fetching the winner.
pub fn ensure_folder(repo: &dyn Repository, path: &str) -> RepoResult<RepoObject> {
    let path = join_path("", path);

    if let Some(existing) = repo.get_by_path(&path)? {
        return expect_folder(existing, &path);
    }

    let mut current = repo
        .get_by_path("/")?
        .ok_or_else(|| RepositoryError::NotFound { what: "/".into() })?;

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let next_path = join_path(&current.path, segment);
        current = match repo.get_by_path(&next_path)? {
            Some(existing) => expect_folder(existing, &next_path)?,
            None => match repo.create_folder(&current.path, segment) {
                Ok(created) => {
                    debug!(repository = repo.name(), path = %next_path, "Folder created");
                    created
                }
                Err(e) if e.is_already_exists() => repo
                    .get_by_path(&next_path)?
                    .ok_or(RepositoryError::NotFound { what: next_path.clone() })
                    .and_then(|obj| expect_folder(obj, &next_path))?,
                Err(e) => return Err(e),
            },
        };
    }

    Ok(current)
}

fn expect_folder(obj: RepoObject, path: &str) -> RepoResult<RepoObject> {
    if obj.kind == ObjectKind::Folder {
        Ok(obj)
    } else {
        Err(RepositoryError::NotAFolder { path: path.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_folder_idempotent() {
        let repo = MemoryRepository::new("target");

        let first = ensure_folder(&repo, "/a/b/c").unwrap();
        let second = ensure_folder(&repo, "/a/b/c").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.path, "/a/b/c");
        assert!(repo.get_by_path("/a/b").unwrap().is_some());
    }

    #[test]
    fn test_ensure_folder_root() {
        let repo = MemoryRepository::new("target");
        let root = ensure_folder(&repo, "").unwrap();
        assert_eq!(root.path, "/");
    }

    #[test]
    fn test_ensure_folder_rejects_document() {
        let repo = MemoryRepository::new("target");
        repo.add_document("/a", "doc.txt", b"x");

        let err = ensure_folder(&repo, "/a/doc.txt").unwrap_err();
        assert!(matches!(err, RepositoryError::NotAFolder { .. }));
    }
}
