//! Repository rooted at a local directory
//!
//! Folders are directories and documents are regular files holding their
//! current content. Everything else lives in a hidden `.repo` directory next
//! to the object:
//!
//! ```text
//! reports/
//! ├── q1.pdf               current content
//! └── .repo/
//!     ├── q1.pdf.json      type, aspects, version history, relationships
//!     ├── q1.pdf@1.0       content of superseded versions
//!     └── @acl             ACL of the `reports` folder itself
//! ```
//!
//! Object ids are repository paths. Files without a sidecar record are
//! reported as single-version `cm:content` documents.

use super::types::*;
use super::Repository;
use crate::error::{RepoResult, RepositoryError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the sidecar directory
const SIDECAR_DIR: &str = ".repo";

/// Sidecar entry holding a folder's own ACL
const FOLDER_ACL: &str = "@acl";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionRecord {
    label: String,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelationRecord {
    relation_type: String,
    target_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentRecord {
    #[serde(rename = "type")]
    type_id: String,
    #[serde(default)]
    aspects: Vec<String>,
    /// Oldest first
    versions: Vec<VersionRecord>,
    #[serde(default)]
    collections: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    relationships: Vec<RelationRecord>,
}

impl DocumentRecord {
    fn new(type_id: &str, properties: Map<String, Value>) -> Self {
        Self {
            type_id: type_id.to_string(),
            aspects: Vec::new(),
            versions: vec![VersionRecord {
                label: "1.0".to_string(),
                properties,
            }],
            collections: BTreeMap::new(),
            relationships: Vec::new(),
        }
    }

    fn current_label(&self) -> &str {
        self.versions.last().map(|v| v.label.as_str()).unwrap_or("1.0")
    }
}

/// Repository stored under a local directory
pub struct FsRepository {
    name: String,
    root: PathBuf,
    /// Serializes read-modify-write cycles on sidecar records
    records: Mutex<()>,
}

impl FsRepository {
    /// Open a repository rooted at `root`
    pub fn open(name: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            root: root.into(),
            records: Mutex::new(()),
        }
    }

    /// Local directory backing the repository
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of a repository path; `..` segments never resolve
    fn local(&self, path: &str) -> RepoResult<PathBuf> {
        let relative = path.trim_start_matches('/');
        if relative.split('/').any(|segment| segment == "..") {
            return Err(RepositoryError::NotFound { what: path.to_string() });
        }
        Ok(self.root.join(relative))
    }

    fn sidecar(&self, path: &str, suffix: &str) -> RepoResult<PathBuf> {
        let file_name = format!("{}{}", base_name(path), suffix);
        if file_name.contains('/') {
            return Err(RepositoryError::NotFound { what: file_name });
        }
        Ok(self.local(&parent_path(path))?.join(SIDECAR_DIR).join(file_name))
    }

    fn acl_path(&self, path: &str) -> RepoResult<PathBuf> {
        let local = self.local(path)?;
        if path == "/" || local.is_dir() {
            Ok(local.join(SIDECAR_DIR).join(FOLDER_ACL))
        } else {
            self.sidecar(path, FOLDER_ACL)
        }
    }

    fn load_record(&self, path: &str) -> RepoResult<DocumentRecord> {
        let record_path = self.sidecar(path, ".json")?;
        match fs::read(&record_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| RepositoryError::Corrupt {
                path: path.to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.synthesize_record(path),
            Err(e) => Err(RepositoryError::io(path, e)),
        }
    }

    fn synthesize_record(&self, path: &str) -> RepoResult<DocumentRecord> {
        let meta = fs::metadata(self.local(path)?).map_err(|e| RepositoryError::io(path, e))?;
        let mut properties = Map::new();
        properties.insert(PROP_NAME.to_string(), Value::String(base_name(path).to_string()));
        if let Ok(modified) = meta.modified() {
            let modified: DateTime<Utc> = modified.into();
            properties.insert(
                PROP_MODIFIED.to_string(),
                Value::String(modified.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
            );
        }
        Ok(DocumentRecord::new(DEFAULT_CONTENT_TYPE, properties))
    }

    fn save_record(&self, path: &str, record: &DocumentRecord) -> RepoResult<()> {
        let record_path = self.sidecar(path, ".json")?;
        write_file(&record_path, &serde_json::to_vec_pretty(record).map_err(|e| {
            RepositoryError::Corrupt {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?)
    }

    fn object_at(&self, path: &str) -> RepoResult<Option<RepoObject>> {
        let Ok(local) = self.local(path) else {
            return Ok(None);
        };
        let meta = match fs::metadata(&local) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RepositoryError::io(path, e)),
        };

        let path = join_path("", path);
        if meta.is_dir() {
            return Ok(Some(RepoObject {
                id: path.clone(),
                name: base_name(&path).to_string(),
                path,
                kind: ObjectKind::Folder,
                version_label: None,
            }));
        }

        let record = self.load_record(&path)?;
        Ok(Some(RepoObject {
            id: path.clone(),
            name: base_name(&path).to_string(),
            kind: ObjectKind::Document,
            version_label: Some(record.current_label().to_string()),
            path,
        }))
    }

    fn require(&self, id: &str) -> RepoResult<RepoObject> {
        self.object_at(strip_version_label(id))?
            .ok_or_else(|| RepositoryError::NotFound { what: id.to_string() })
    }

    fn sorted_children(&self, folder_path: &str) -> RepoResult<Vec<RepoObject>> {
        let dir = self.local(folder_path)?;
        let entries = fs::read_dir(&dir).map_err(|e| RepositoryError::io(folder_path, e))?;

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RepositoryError::io(folder_path, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == SIDECAR_DIR {
                continue;
            }
            let file_type = entry.file_type().map_err(|e| RepositoryError::io(folder_path, e))?;
            let path = join_path(folder_path, &name);
            children.push(RepoObject {
                id: path.clone(),
                name,
                path,
                kind: if file_type.is_dir() {
                    ObjectKind::Folder
                } else if file_type.is_file() {
                    ObjectKind::Document
                } else {
                    ObjectKind::Other
                },
                version_label: None,
            });
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    fn version_file(&self, path: &str, label: &str) -> RepoResult<PathBuf> {
        self.sidecar(path, &format!("@{}", label))
    }

    fn sidecar_files(&self, path: &str) -> RepoResult<Vec<PathBuf>> {
        let dir = self.local(&parent_path(path))?.join(SIDECAR_DIR);
        let name = base_name(path);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RepositoryError::io(path, e)),
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name == format!("{}.json", name) || file_name.starts_with(&format!("{}@", name)) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> RepoResult<()> {
    let display = path.display().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RepositoryError::io(&display, e))?;
    }
    fs::write(path, bytes).map_err(|e| RepositoryError::io(&display, e))
}

fn version_label_of(version_ref: &str) -> &str {
    version_ref.rsplit(';').next().unwrap_or(version_ref)
}

impl Repository for FsRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&self) -> RepoResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(RepositoryError::Unavailable {
                name: self.name.clone(),
                reason: format!("'{}' is not a directory", self.root.display()),
            })
        }
    }

    fn list_children(
        &self,
        folder_path: &str,
        page: usize,
        page_size: usize,
        skip_documents: bool,
    ) -> RepoResult<FolderPage> {
        let children = self
            .sorted_children(folder_path)?
            .into_iter()
            .filter(|c| !(skip_documents && c.kind == ObjectKind::Document))
            .skip(page * page_size)
            .take(page_size);

        Ok(FolderPage::from_children(children))
    }

    fn query(&self, query: &str, page: usize, page_size: usize) -> RepoResult<Vec<RepoObject>> {
        let pattern = Regex::new(query).map_err(|e| RepositoryError::InvalidQuery {
            query: query.to_string(),
            reason: e.to_string(),
        })?;

        let mut matches = Vec::new();
        let mut pending = vec!["/".to_string()];
        while let Some(folder) = pending.pop() {
            for child in self.sorted_children(&folder)? {
                match child.kind {
                    ObjectKind::Folder => pending.push(child.path),
                    ObjectKind::Document if pattern.is_match(&child.path) => matches.push(child),
                    _ => {}
                }
            }
        }
        matches.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(matches
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .collect())
    }

    fn get_by_path(&self, path: &str) -> RepoResult<Option<RepoObject>> {
        self.object_at(path)
    }

    fn get_by_id(&self, id: &str) -> RepoResult<Option<RepoObject>> {
        self.object_at(strip_version_label(id))
    }

    fn create_folder(&self, parent_path: &str, name: &str) -> RepoResult<RepoObject> {
        let path = join_path(parent_path, name);
        fs::create_dir(self.local(&path)?).map_err(|e| RepositoryError::io(&path, e))?;
        Ok(RepoObject {
            id: path.clone(),
            name: name.to_string(),
            path,
            kind: ObjectKind::Folder,
            version_label: None,
        })
    }

    fn create_document(&self, folder_path: &str, upload: &Upload<'_>) -> RepoResult<RepoObject> {
        let path = join_path(folder_path, upload.file_name);
        let local = self.local(&path)?;
        if local.exists() {
            return Err(RepositoryError::AlreadyExists { what: path });
        }
        if !self.local(folder_path)?.is_dir() {
            return Err(RepositoryError::NotFound { what: folder_path.to_string() });
        }

        let _lock = self.records.lock();
        fs::write(&local, upload.content).map_err(|e| RepositoryError::io(&path, e))?;

        let mut properties = Map::new();
        properties.insert(PROP_NAME.to_string(), Value::String(upload.file_name.to_string()));
        let record = DocumentRecord::new(upload.content_type, properties);
        self.save_record(&path, &record)?;

        Ok(RepoObject {
            id: path.clone(),
            name: upload.file_name.to_string(),
            path,
            kind: ObjectKind::Document,
            version_label: Some("1.0".to_string()),
        })
    }

    fn update_version(&self, id: &str, upload: &Upload<'_>, major: bool) -> RepoResult<RepoObject> {
        let obj = self.require(id)?;
        let _lock = self.records.lock();
        let mut record = self.load_record(&obj.path)?;

        let previous = record.current_label().to_string();
        let superseded = self.version_file(&obj.path, &previous)?;
        let local = self.local(&obj.path)?;
        if let Some(parent) = superseded.parent() {
            fs::create_dir_all(parent).map_err(|e| RepositoryError::io(&obj.path, e))?;
        }
        fs::copy(&local, &superseded).map_err(|e| RepositoryError::io(&obj.path, e))?;
        fs::write(&local, upload.content).map_err(|e| RepositoryError::io(&obj.path, e))?;

        let label = next_version_label(&previous, major);
        let properties = record
            .versions
            .last()
            .map(|v| v.properties.clone())
            .unwrap_or_default();
        record.versions.push(VersionRecord {
            label: label.clone(),
            properties,
        });
        self.save_record(&obj.path, &record)?;

        Ok(RepoObject {
            version_label: Some(label),
            ..obj
        })
    }

    fn delete_object(&self, id: &str) -> RepoResult<()> {
        let obj = self.require(id)?;
        let local = self.local(&obj.path)?;

        match obj.kind {
            ObjectKind::Folder => {
                fs::remove_dir_all(&local).map_err(|e| RepositoryError::io(&obj.path, e))?;
            }
            _ => {
                let _lock = self.records.lock();
                fs::remove_file(&local).map_err(|e| RepositoryError::io(&obj.path, e))?;
                for file in self.sidecar_files(&obj.path)? {
                    fs::remove_file(&file).map_err(|e| RepositoryError::io(&obj.path, e))?;
                }
            }
        }
        Ok(())
    }

    fn move_object(&self, id: &str, destination_folder: &str) -> RepoResult<()> {
        let obj = self.require(id)?;
        let new_path = join_path(destination_folder, &obj.name);
        if self.local(&new_path)?.exists() {
            return Err(RepositoryError::AlreadyExists { what: new_path });
        }

        let _lock = self.records.lock();
        let sidecars = self.sidecar_files(&obj.path)?;
        fs::rename(self.local(&obj.path)?, self.local(&new_path)?)
            .map_err(|e| RepositoryError::io(&obj.path, e))?;

        let sidecar_dir = self.local(destination_folder)?.join(SIDECAR_DIR);
        for file in sidecars {
            if let Some(file_name) = file.file_name() {
                fs::create_dir_all(&sidecar_dir).map_err(|e| RepositoryError::io(&new_path, e))?;
                fs::rename(&file, sidecar_dir.join(file_name))
                    .map_err(|e| RepositoryError::io(&new_path, e))?;
            }
        }
        Ok(())
    }

    fn create_relationship(&self, from_id: &str, to_id: &str, relation_type: &str) -> RepoResult<()> {
        let from = self.require(from_id)?;
        let to = self.require(to_id)?;

        let _lock = self.records.lock();
        let mut record = self.load_record(&from.path)?;
        if record
            .relationships
            .iter()
            .any(|r| r.relation_type == relation_type && r.target_id == to.id)
        {
            return Err(RepositoryError::AlreadyExists {
                what: format!("{} {} -> {}", relation_type, from.id, to.id),
            });
        }

        record.relationships.push(RelationRecord {
            relation_type: relation_type.to_string(),
            target_id: to.id,
        });
        self.save_record(&from.path, &record)
    }

    fn relationships(&self, id: &str) -> RepoResult<Vec<Relationship>> {
        let obj = self.require(id)?;
        let record = self.load_record(&obj.path)?;
        Ok(record
            .relationships
            .into_iter()
            .map(|r| Relationship {
                source_id: obj.id.clone(),
                target_id: r.target_id,
                relation_type: r.relation_type,
            })
            .collect())
    }

    fn get_metadata(&self, id: &str, version_ref: Option<&str>) -> RepoResult<Metadata> {
        let obj = self.require(id)?;
        let record = self.load_record(&obj.path)?;

        let (metadata_id, version) = match version_ref {
            None => (obj.id.clone(), record.versions.last()),
            Some(version_ref) => {
                let label = version_label_of(version_ref);
                (
                    version_ref.to_string(),
                    record.versions.iter().find(|v| v.label == label),
                )
            }
        };
        let version = version.ok_or_else(|| RepositoryError::NotFound {
            what: version_ref.unwrap_or(id).to_string(),
        })?;

        Ok(Metadata {
            id: metadata_id,
            type_id: record.type_id.clone(),
            aspects: record.aspects.clone(),
            properties: version.properties.clone(),
        })
    }

    fn update_properties(&self, id: &str, metadata: &Metadata) -> RepoResult<()> {
        let obj = self.require(id)?;
        let _lock = self.records.lock();
        let mut record = self.load_record(&obj.path)?;

        record.type_id = metadata.type_id.clone();
        record.aspects = metadata.aspects.clone();
        if let Some(current) = record.versions.last_mut() {
            for (key, value) in &metadata.properties {
                // blank values leave the property unset
                if value.as_str() == Some("") {
                    continue;
                }
                current.properties.insert(key.clone(), value.clone());
            }
        }
        self.save_record(&obj.path, &record)
    }

    fn update_collections(
        &self,
        id: &str,
        collections: &BTreeMap<String, Vec<String>>,
    ) -> RepoResult<()> {
        let obj = self.require(id)?;
        let _lock = self.records.lock();
        let mut record = self.load_record(&obj.path)?;
        record
            .collections
            .extend(collections.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.save_record(&obj.path, &record)
    }

    fn get_version_list(&self, id: &str) -> RepoResult<Vec<VersionEntry>> {
        let obj = self.require(id)?;
        let record = self.load_record(&obj.path)?;
        Ok(record
            .versions
            .iter()
            .rev()
            .map(|v| VersionEntry {
                version_ref: format!("{};{}", obj.id, v.label),
                label: v.label.clone(),
            })
            .collect())
    }

    fn get_content(&self, id: &str, version_ref: Option<&str>) -> RepoResult<Vec<u8>> {
        let obj = self.require(id)?;
        let current = obj.version_label.as_deref().unwrap_or("1.0");

        let file = match version_ref.map(version_label_of) {
            Some(label) if label != current => self.version_file(&obj.path, label)?,
            _ => self.local(&obj.path)?,
        };
        fs::read(&file).map_err(|e| RepositoryError::io(version_ref.unwrap_or(id), e))
    }

    fn get_permissions(&self, id: &str) -> RepoResult<Permissions> {
        let obj = self.require(id)?;
        match fs::read(self.acl_path(&obj.path)?) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| RepositoryError::Corrupt {
                path: obj.path.clone(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Permissions::default()),
            Err(e) => Err(RepositoryError::io(&obj.path, e)),
        }
    }

    fn set_permissions(&self, id: &str, permissions: &Permissions) -> RepoResult<()> {
        let obj = self.require(id)?;
        let bytes = serde_json::to_vec_pretty(permissions).map_err(|e| RepositoryError::Corrupt {
            path: obj.path.clone(),
            reason: e.to_string(),
        })?;
        write_file(&self.acl_path(&obj.path)?, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn upload<'a>(name: &'a str, content: &'a [u8]) -> Upload<'a> {
        Upload {
            file_name: name,
            content_type: DEFAULT_CONTENT_TYPE,
            content,
        }
    }

    #[test]
    fn test_plain_files_are_documents() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/doc.txt"), b"hello").unwrap();

        let repo = FsRepository::open("source", dir.path());
        let page = repo.list_children("/a", 0, 10, false).unwrap();
        assert_eq!(page.documents.len(), 1);

        let metadata = repo.get_metadata("/a/doc.txt", None).unwrap();
        assert_eq!(metadata.string_property(PROP_NAME), Some("doc.txt"));
        assert_eq!(repo.get_content("/a/doc.txt", None).unwrap(), b"hello");
    }

    #[test]
    fn test_versions_round_trip() {
        let dir = tempdir().unwrap();
        let repo = FsRepository::open("target", dir.path());

        let created = repo.create_document("/", &upload("doc.txt", b"one")).unwrap();
        repo.update_version(&created.id, &upload("doc.txt", b"two"), true).unwrap();

        let versions = repo.get_version_list(&created.id).unwrap();
        assert_eq!(versions[0].label, "2.0");
        assert_eq!(versions[1].label, "1.0");
        assert_eq!(repo.get_content(&created.id, Some(&versions[1].version_ref)).unwrap(), b"one");
        assert_eq!(repo.get_content(&created.id, None).unwrap(), b"two");

        // sidecar directory never shows up as a child
        let page = repo.list_children("/", 0, 10, false).unwrap();
        assert!(page.folders.is_empty());
        assert_eq!(page.documents.len(), 1);
    }

    #[test]
    fn test_delete_removes_sidecars() {
        let dir = tempdir().unwrap();
        let repo = FsRepository::open("target", dir.path());

        let created = repo.create_document("/", &upload("doc.txt", b"one")).unwrap();
        repo.update_version(&created.id, &upload("doc.txt", b"two"), false).unwrap();
        repo.delete_object(&created.id).unwrap();

        assert!(repo.get_by_path("/doc.txt").unwrap().is_none());
        assert!(repo.sidecar_files("/doc.txt").unwrap().is_empty());
    }

    #[test]
    fn test_folder_permissions() {
        let dir = tempdir().unwrap();
        let repo = FsRepository::open("target", dir.path());
        let folder = repo.create_folder("/", "team").unwrap();

        let acl = Permissions {
            inherited: false,
            direct: vec![PermissionEntry {
                authority: "GROUP_team".into(),
                role: "Collaborator".into(),
            }],
        };
        repo.set_permissions(&folder.id, &acl).unwrap();
        assert_eq!(repo.get_permissions(&folder.id).unwrap(), acl);

        let err = repo.create_folder("/", "team").unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_paths_cannot_leave_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("outside.txt"), b"keep").unwrap();
        fs::create_dir(dir.path().join("repo")).unwrap();
        let repo = FsRepository::open("source", dir.path().join("repo"));

        assert!(repo.get_by_id("/../outside.txt").unwrap().is_none());
        assert!(repo.get_by_path("/a/../../outside.txt").unwrap().is_none());
        assert!(repo.get_content("/../outside.txt", None).unwrap_err().is_not_found());
        assert!(repo.delete_object("/../outside.txt").unwrap_err().is_not_found());
        assert!(repo.list_children("/..", 0, 10, false).unwrap_err().is_not_found());
        assert!(repo.create_folder("/", "..").unwrap_err().is_not_found());

        assert_eq!(fs::read(dir.path().join("outside.txt")).unwrap(), b"keep");
    }
}
