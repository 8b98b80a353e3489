//! In-process repository
//!
//! Holds folders, documents with full version histories, relationships and
//! ACLs in memory. It backs the scenario tests, so it keeps a log of mutating
//! calls and can be told to fail specific operations.

use super::types::*;
use super::Repository;
use crate::error::{RepoResult, RepositoryError};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredVersion {
    label: String,
    content: Vec<u8>,
    metadata: Metadata,
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    name: String,
    path: String,
    kind: ObjectKind,
    /// Oldest first
    versions: Vec<StoredVersion>,
    collections: BTreeMap<String, Vec<String>>,
    relationships: Vec<Relationship>,
    permissions: Permissions,
    /// Created by an upload while uploads are hidden
    hidden: bool,
}

impl Node {
    fn to_object(&self) -> RepoObject {
        RepoObject {
            id: self.id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
            kind: self.kind,
            version_label: self.versions.last().map(|v| v.label.clone()),
        }
    }

    fn current(&self) -> RepoResult<&StoredVersion> {
        self.versions.last().ok_or_else(|| RepositoryError::NotFound {
            what: format!("{} (no content)", self.id),
        })
    }
}

#[derive(Debug, Default)]
struct Store {
    nodes: HashMap<String, Node>,
    paths: HashMap<String, String>,
}

impl Store {
    fn by_id(&self, id: &str) -> Option<&Node> {
        self.nodes
            .get(id)
            .or_else(|| self.nodes.get(strip_version_label(id)))
    }

    fn by_id_mut(&mut self, id: &str) -> RepoResult<&mut Node> {
        let key = if self.nodes.contains_key(id) {
            id.to_string()
        } else {
            strip_version_label(id).to_string()
        };
        self.nodes
            .get_mut(&key)
            .ok_or_else(|| RepositoryError::NotFound { what: id.to_string() })
    }

    fn insert(&mut self, node: Node) {
        self.paths.insert(node.path.clone(), node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    fn children(&self, folder_path: &str) -> Vec<&Node> {
        let mut children: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| n.path != "/" && parent_path(&n.path) == folder_path)
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        children
    }
}

/// How path lookups of stored documents are distorted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSkew {
    /// The document is only reachable by id
    Moved,
    /// Another node answers at the document's path
    Foreign,
    /// The document reports an unexpected version label
    Relabelled,
}

#[derive(Debug, Default)]
struct Faults {
    /// 1-based number of the upload that fails
    fail_upload_number: Option<usize>,
    uploads: usize,
    fail_deletes: bool,
    hide_uploads: bool,
    fail_listing: HashSet<String>,
    fail_relationships: bool,
    path_skew: Option<PathSkew>,
}

/// Repository kept entirely in memory
pub struct MemoryRepository {
    name: String,
    store: RwLock<Store>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<String>>,
}

impl MemoryRepository {
    /// Create an empty repository containing only the root folder
    pub fn new(name: &str) -> Self {
        let mut store = Store::default();
        store.insert(Node {
            id: Uuid::new_v4().to_string(),
            name: String::new(),
            path: "/".to_string(),
            kind: ObjectKind::Folder,
            versions: Vec::new(),
            collections: BTreeMap::new(),
            relationships: Vec::new(),
            permissions: Permissions::default(),
            hidden: false,
        });

        Self {
            name: name.to_string(),
            store: RwLock::new(store),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Seed a folder (parents included) and return its id
    pub fn add_folder(&self, path: &str) -> String {
        let mut store = self.store.write();
        let mut current = "/".to_string();
        let mut id = store.paths.get("/").cloned().unwrap_or_default();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = join_path(&current, segment);
            let existing = store.paths.get(&next).cloned();
            id = match existing {
                Some(existing) => existing,
                None => {
                    let node = folder_node(segment, &next);
                    let new_id = node.id.clone();
                    store.insert(node);
                    new_id
                }
            };
            current = next;
        }
        id
    }

    /// Seed a single-version document and return its id
    pub fn add_document(&self, folder: &str, name: &str, content: &[u8]) -> String {
        self.add_versioned_document(folder, name, &[("1.0", content)])
    }

    /// Seed a document with a version history given oldest first
    pub fn add_versioned_document<C: AsRef<[u8]>>(
        &self,
        folder: &str,
        name: &str,
        versions: &[(&str, C)],
    ) -> String {
        self.seed_document(folder, name, Uuid::new_v4().to_string(), versions)
    }

    /// Seed a checked-out private working copy
    pub fn add_working_copy(&self, folder: &str, name: &str) -> String {
        let id = format!("{}{}", Uuid::new_v4(), WORKING_COPY_SUFFIX);
        self.seed_document(folder, name, id, &[("1.0", b"")])
    }

    fn seed_document<C: AsRef<[u8]>>(
        &self,
        folder: &str,
        name: &str,
        id: String,
        versions: &[(&str, C)],
    ) -> String {
        self.add_folder(folder);
        let path = join_path(folder, name);
        let versions = versions
            .iter()
            .map(|(label, content)| StoredVersion {
                label: label.to_string(),
                content: content.as_ref().to_vec(),
                metadata: Metadata {
                    id: format!("{};{}", id, label),
                    type_id: DEFAULT_CONTENT_TYPE.to_string(),
                    aspects: Vec::new(),
                    properties: name_properties(name),
                },
            })
            .collect();

        self.store.write().insert(Node {
            id: id.clone(),
            name: name.to_string(),
            path,
            kind: ObjectKind::Document,
            versions,
            collections: BTreeMap::new(),
            relationships: Vec::new(),
            permissions: Permissions::default(),
            hidden: false,
        });
        id
    }

    /// Seed properties on one version of a document (`None` = current)
    pub fn set_properties(&self, id: &str, label: Option<&str>, properties: Map<String, Value>) {
        let mut store = self.store.write();
        if let Ok(node) = store.by_id_mut(id) {
            let version = match label {
                Some(label) => node.versions.iter_mut().find(|v| v.label == label),
                None => node.versions.last_mut(),
            };
            if let Some(version) = version {
                version.metadata.properties.extend(properties);
            }
        }
    }

    /// Seed type and aspects on every version of a document
    pub fn set_type(&self, id: &str, type_id: &str, aspects: &[&str]) {
        let mut store = self.store.write();
        if let Ok(node) = store.by_id_mut(id) {
            for version in &mut node.versions {
                version.metadata.type_id = type_id.to_string();
                version.metadata.aspects = aspects.iter().map(|a| a.to_string()).collect();
            }
        }
    }

    /// Make the n-th upload (creation or new version, 1-based) fail
    pub fn fail_upload_number(&self, n: usize) {
        self.faults.lock().fail_upload_number = Some(n);
    }

    /// Make every delete fail
    pub fn fail_deletes(&self) {
        self.faults.lock().fail_deletes = true;
    }

    /// Make documents disappear from lookups right after they are uploaded
    pub fn hide_uploads(&self) {
        self.faults.lock().hide_uploads = true;
    }

    /// Make listings of a folder fail
    pub fn fail_listing(&self, path: &str) {
        self.faults.lock().fail_listing.insert(path.to_string());
    }

    /// Make relationship creation fail
    pub fn fail_relationships(&self) {
        self.faults.lock().fail_relationships = true;
    }

    /// Distort path lookups of existing documents
    pub fn skew_paths(&self, skew: PathSkew) {
        self.faults.lock().path_skew = Some(skew);
    }

    /// Mutating calls in the order they were received
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of logged calls starting with `prefix`
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Number of documents stored, hidden ones included
    pub fn document_count(&self) -> usize {
        self.store
            .read()
            .nodes
            .values()
            .filter(|n| n.kind == ObjectKind::Document)
            .count()
    }

    /// Current content of the document at `path`
    pub fn content_at(&self, path: &str) -> Option<Vec<u8>> {
        let store = self.store.read();
        let id = store.paths.get(path)?;
        store.nodes.get(id)?.versions.last().map(|v| v.content.clone())
    }

    /// Version labels of the document at `path`, oldest first
    pub fn labels_at(&self, path: &str) -> Vec<String> {
        let store = self.store.read();
        store
            .paths
            .get(path)
            .and_then(|id| store.nodes.get(id))
            .map(|n| n.versions.iter().map(|v| v.label.clone()).collect())
            .unwrap_or_default()
    }

    /// Collection properties of the document at `path`
    pub fn collections_at(&self, path: &str) -> BTreeMap<String, Vec<String>> {
        let store = self.store.read();
        store
            .paths
            .get(path)
            .and_then(|id| store.nodes.get(id))
            .map(|n| n.collections.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn check_upload_fault(&self) -> RepoResult<bool> {
        let mut faults = self.faults.lock();
        faults.uploads += 1;
        if faults.fail_upload_number == Some(faults.uploads) {
            return Err(RepositoryError::Injected(format!(
                "Upload {} rejected",
                faults.uploads
            )));
        }
        Ok(faults.hide_uploads)
    }
}

fn folder_node(name: &str, path: &str) -> Node {
    Node {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        path: path.to_string(),
        kind: ObjectKind::Folder,
        versions: Vec::new(),
        collections: BTreeMap::new(),
        relationships: Vec::new(),
        permissions: Permissions::default(),
        hidden: false,
    }
}

fn name_properties(name: &str) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(PROP_NAME.to_string(), Value::String(name.to_string()));
    properties
}

impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&self) -> RepoResult<()> {
        Ok(())
    }

    fn list_children(
        &self,
        folder_path: &str,
        page: usize,
        page_size: usize,
        skip_documents: bool,
    ) -> RepoResult<FolderPage> {
        if self.faults.lock().fail_listing.contains(folder_path) {
            return Err(RepositoryError::Injected(format!(
                "Listing of {} rejected",
                folder_path
            )));
        }

        let store = self.store.read();
        if !store.paths.contains_key(folder_path) {
            return Err(RepositoryError::NotFound { what: folder_path.to_string() });
        }

        let children = store
            .children(folder_path)
            .into_iter()
            .filter(|n| !(skip_documents && n.kind == ObjectKind::Document))
            .skip(page * page_size)
            .take(page_size)
            .map(Node::to_object);

        Ok(FolderPage::from_children(children))
    }

    fn query(&self, query: &str, page: usize, page_size: usize) -> RepoResult<Vec<RepoObject>> {
        let pattern = Regex::new(query).map_err(|e| RepositoryError::InvalidQuery {
            query: query.to_string(),
            reason: e.to_string(),
        })?;

        let store = self.store.read();
        let mut matches: Vec<&Node> = store
            .nodes
            .values()
            .filter(|n| n.kind == ObjectKind::Document && pattern.is_match(&n.path))
            .collect();
        matches.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(matches
            .into_iter()
            .skip(page * page_size)
            .take(page_size)
            .map(Node::to_object)
            .collect())
    }

    fn get_by_path(&self, path: &str) -> RepoResult<Option<RepoObject>> {
        let skew = self.faults.lock().path_skew;
        let store = self.store.read();
        let found = store
            .paths
            .get(path)
            .and_then(|id| store.nodes.get(id))
            .filter(|n| !n.hidden)
            .map(Node::to_object);

        Ok(match (found, skew) {
            (Some(obj), Some(skew)) if obj.kind == ObjectKind::Document => match skew {
                PathSkew::Moved => None,
                PathSkew::Foreign => Some(RepoObject {
                    id: Uuid::new_v4().to_string(),
                    ..obj
                }),
                PathSkew::Relabelled => Some(RepoObject {
                    version_label: Some("9.9".into()),
                    ..obj
                }),
            },
            (found, _) => found,
        })
    }

    fn get_by_id(&self, id: &str) -> RepoResult<Option<RepoObject>> {
        let store = self.store.read();
        Ok(store.by_id(id).filter(|n| !n.hidden).map(Node::to_object))
    }

    fn create_folder(&self, parent_path: &str, name: &str) -> RepoResult<RepoObject> {
        let path = join_path(parent_path, name);
        let mut store = self.store.write();

        if store.paths.contains_key(&path) {
            return Err(RepositoryError::AlreadyExists { what: path });
        }
        if !store.paths.contains_key(parent_path) {
            return Err(RepositoryError::NotFound { what: parent_path.to_string() });
        }

        let node = folder_node(name, &path);
        let obj = node.to_object();
        store.insert(node);
        drop(store);

        self.record(format!("create_folder:{}", path));
        Ok(obj)
    }

    fn create_document(&self, folder_path: &str, upload: &Upload<'_>) -> RepoResult<RepoObject> {
        let path = join_path(folder_path, upload.file_name);
        self.record(format!("create_document:{}", path));
        let hidden = self.check_upload_fault()?;

        let mut store = self.store.write();
        if store.paths.contains_key(&path) {
            return Err(RepositoryError::AlreadyExists { what: path });
        }
        if !store.paths.contains_key(folder_path) {
            return Err(RepositoryError::NotFound { what: folder_path.to_string() });
        }

        let id = Uuid::new_v4().to_string();
        let node = Node {
            id: id.clone(),
            name: upload.file_name.to_string(),
            path,
            kind: ObjectKind::Document,
            versions: vec![StoredVersion {
                label: "1.0".to_string(),
                content: upload.content.to_vec(),
                metadata: Metadata {
                    id: format!("{};1.0", id),
                    type_id: upload.content_type.to_string(),
                    aspects: Vec::new(),
                    properties: name_properties(upload.file_name),
                },
            }],
            collections: BTreeMap::new(),
            relationships: Vec::new(),
            permissions: Permissions::default(),
            hidden,
        };
        let obj = node.to_object();
        store.insert(node);
        Ok(obj)
    }

    fn update_version(&self, id: &str, upload: &Upload<'_>, major: bool) -> RepoResult<RepoObject> {
        self.record(format!("update_version:{}:{}", upload.file_name, if major { "major" } else { "minor" }));
        self.check_upload_fault()?;

        let mut store = self.store.write();
        let node = store.by_id_mut(id)?;
        let previous = node.current()?;
        let label = next_version_label(&previous.label, major);
        let mut metadata = previous.metadata.clone();
        metadata.id = format!("{};{}", node.id, label);

        node.versions.push(StoredVersion {
            label,
            content: upload.content.to_vec(),
            metadata,
        });
        Ok(node.to_object())
    }

    fn delete_object(&self, id: &str) -> RepoResult<()> {
        self.record(format!("delete_object:{}", id));
        if self.faults.lock().fail_deletes {
            return Err(RepositoryError::Injected(format!("Delete of {} rejected", id)));
        }

        let mut store = self.store.write();
        let path = store.by_id_mut(id)?.path.clone();
        let prefix = format!("{}/", path);
        let doomed: Vec<String> = store
            .nodes
            .values()
            .filter(|n| n.path == path || n.path.starts_with(&prefix))
            .map(|n| n.id.clone())
            .collect();

        for node_id in doomed {
            if let Some(node) = store.nodes.remove(&node_id) {
                store.paths.remove(&node.path);
            }
        }
        Ok(())
    }

    fn move_object(&self, id: &str, destination_folder: &str) -> RepoResult<()> {
        self.record(format!("move_object:{}:{}", id, destination_folder));
        let mut guard = self.store.write();
        let store = &mut *guard;
        if !store.paths.contains_key(destination_folder) {
            return Err(RepositoryError::NotFound { what: destination_folder.to_string() });
        }

        let node = store.by_id_mut(id)?;
        let old_path = node.path.clone();
        let new_path = join_path(destination_folder, &node.name);
        let old_prefix = format!("{}/", old_path);

        let affected: Vec<String> = store
            .nodes
            .values()
            .filter(|n| n.path == old_path || n.path.starts_with(&old_prefix))
            .map(|n| n.id.clone())
            .collect();

        if store.paths.contains_key(&new_path) {
            return Err(RepositoryError::AlreadyExists { what: new_path });
        }

        for node_id in affected {
            if let Some(node) = store.nodes.get_mut(&node_id) {
                let moved = format!("{}{}", new_path, &node.path[old_path.len()..]);
                let previous = std::mem::replace(&mut node.path, moved.clone());
                store.paths.remove(&previous);
                store.paths.insert(moved, node_id);
            }
        }
        Ok(())
    }

    fn create_relationship(&self, from_id: &str, to_id: &str, relation_type: &str) -> RepoResult<()> {
        self.record(format!("create_relationship:{}:{}:{}", from_id, to_id, relation_type));
        if self.faults.lock().fail_relationships {
            return Err(RepositoryError::Injected(format!(
                "Relationship {} rejected",
                relation_type
            )));
        }

        let mut store = self.store.write();
        if store.by_id(to_id).is_none() {
            return Err(RepositoryError::NotFound { what: to_id.to_string() });
        }

        let node = store.by_id_mut(from_id)?;
        let relationship = Relationship {
            source_id: node.id.clone(),
            target_id: strip_version_label(to_id).to_string(),
            relation_type: relation_type.to_string(),
        };
        if node.relationships.contains(&relationship) {
            return Err(RepositoryError::AlreadyExists {
                what: format!("{} {} -> {}", relation_type, from_id, to_id),
            });
        }
        node.relationships.push(relationship);
        Ok(())
    }

    fn relationships(&self, id: &str) -> RepoResult<Vec<Relationship>> {
        let store = self.store.read();
        store
            .by_id(id)
            .map(|n| n.relationships.clone())
            .ok_or_else(|| RepositoryError::NotFound { what: id.to_string() })
    }

    fn get_metadata(&self, id: &str, version_ref: Option<&str>) -> RepoResult<Metadata> {
        let store = self.store.read();
        let node = store
            .by_id(id)
            .ok_or_else(|| RepositoryError::NotFound { what: id.to_string() })?;

        match version_ref {
            None => {
                let mut metadata = node.current()?.metadata.clone();
                metadata.id = node.id.clone();
                Ok(metadata)
            }
            Some(version_ref) => {
                let label = version_ref.rsplit(';').next().unwrap_or(version_ref);
                node.versions
                    .iter()
                    .find(|v| v.label == label)
                    .map(|v| v.metadata.clone())
                    .ok_or_else(|| RepositoryError::NotFound { what: version_ref.to_string() })
            }
        }
    }

    fn update_properties(&self, id: &str, metadata: &Metadata) -> RepoResult<()> {
        self.record(format!("update_properties:{}", id));
        let mut store = self.store.write();
        let node = store.by_id_mut(id)?;
        let current = node
            .versions
            .last_mut()
            .ok_or_else(|| RepositoryError::NotFound { what: id.to_string() })?;

        current.metadata.type_id = metadata.type_id.clone();
        current.metadata.aspects = metadata.aspects.clone();
        for (key, value) in &metadata.properties {
            // blank values leave the property unset
            if value.as_str() == Some("") {
                continue;
            }
            current.metadata.properties.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn update_collections(
        &self,
        id: &str,
        collections: &BTreeMap<String, Vec<String>>,
    ) -> RepoResult<()> {
        self.record(format!("update_collections:{}", id));
        let mut store = self.store.write();
        let node = store.by_id_mut(id)?;
        node.collections
            .extend(collections.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn get_version_list(&self, id: &str) -> RepoResult<Vec<VersionEntry>> {
        let store = self.store.read();
        let node = store
            .by_id(id)
            .ok_or_else(|| RepositoryError::NotFound { what: id.to_string() })?;

        Ok(node
            .versions
            .iter()
            .rev()
            .map(|v| VersionEntry {
                version_ref: format!("{};{}", node.id, v.label),
                label: v.label.clone(),
            })
            .collect())
    }

    fn get_content(&self, id: &str, version_ref: Option<&str>) -> RepoResult<Vec<u8>> {
        let store = self.store.read();
        let node = store
            .by_id(id)
            .ok_or_else(|| RepositoryError::NotFound { what: id.to_string() })?;

        match version_ref {
            None => Ok(node.current()?.content.clone()),
            Some(version_ref) => {
                let label = version_ref.rsplit(';').next().unwrap_or(version_ref);
                node.versions
                    .iter()
                    .find(|v| v.label == label)
                    .map(|v| v.content.clone())
                    .ok_or_else(|| RepositoryError::NotFound { what: version_ref.to_string() })
            }
        }
    }

    fn get_permissions(&self, id: &str) -> RepoResult<Permissions> {
        let store = self.store.read();
        store
            .by_id(id)
            .map(|n| n.permissions.clone())
            .ok_or_else(|| RepositoryError::NotFound { what: id.to_string() })
    }

    fn set_permissions(&self, id: &str, permissions: &Permissions) -> RepoResult<()> {
        self.record(format!("set_permissions:{}", id));
        let mut store = self.store.write();
        store.by_id_mut(id)?.permissions = permissions.clone();
        Ok(())
    }

    fn close(&self) {
        self.record("close".to_string());
    }
}
