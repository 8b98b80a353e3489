//! Property transformation applied before every property push

use crate::job::DocumentProperties;
use crate::repository::Metadata;
use serde_json::Value;
use std::collections::BTreeMap;

/// Repository-internal and version-store properties never copied
pub const REMOVED_PROPERTIES: &[&str] = &[
    "{http://www.alfresco.org/model/content/1.0}content",
    "{http://www.alfresco.org/model/content/1.0}initialVersion",
    "{http://www.alfresco.org/model/content/1.0}versionType",
    "{http://www.alfresco.org/model/content/1.0}versionLabel",
    "{http://www.alfresco.org/model/content/1.0}lockType",
    "{http://www.alfresco.org/model/content/1.0}lockLifetime",
    "{http://www.alfresco.org/model/content/1.0}lockOwner",
    "{http://www.alfresco.org/model/content/1.0}lastThumbnailModification",
    "{http://www.alfresco.org/model/system/1.0}store-identifier",
    "{http://www.alfresco.org/model/system/1.0}store-protocol",
    "{http://www.alfresco.org/model/system/1.0}node-dbid",
    "{http://www.alfresco.org/model/system/1.0}locale",
    "{http://www.alfresco.org/model/system/1.0}node-uuid",
    "{http://www.alfresco.org/model/versionstore/2.0}frozenModifier",
    "{http://www.alfresco.org/model/versionstore/2.0}frozenCreated",
    "{http://www.alfresco.org/model/versionstore/2.0}frozenNodeDbId",
    "{http://www.alfresco.org/model/versionstore/2.0}frozenModified",
    "{http://www.alfresco.org/model/versionstore/2.0}frozenNodeRef",
    "{http://www.alfresco.org/model/versionstore/2.0}metadata-versionType",
    "{http://www.alfresco.org/model/versionstore/2.0}frozenCreator",
    "{http://www.alfresco.org/model/versionstore/2.0}versionLabel",
    "{http://www.alfresco.org/model/versionstore/2.0}frozenAccessed",
    "{http://www.alfresco.org/model/versionstore/2.0}versionDescription",
];

/// Auto-versioning flags forced to false on the target
pub const FALSE_PROPERTIES: &[&str] = &[
    "{http://www.alfresco.org/model/content/1.0}autoVersion",
    "{http://www.alfresco.org/model/content/1.0}autoVersionOnUpdateProps",
];

/// Prefixes known without configuration
pub fn default_namespace_prefixes() -> BTreeMap<String, String> {
    [
        ("http://www.alfresco.org/model/content/1.0", "cm"),
        ("http://www.alfresco.org/model/system/1.0", "sys"),
        ("http://www.alfresco.org/model/application/1.0", "app"),
        ("http://www.alfresco.org/model/dictionary/1.0", "d"),
    ]
    .into_iter()
    .map(|(uri, prefix)| (uri.to_string(), prefix.to_string()))
    .collect()
}

/// Configured transformation of a source property bag
#[derive(Debug, Clone, Default)]
pub struct PropertyTransform {
    pub filter: Vec<String>,
    pub new_content_type: Option<String>,
    pub source_id_property: Option<String>,
    pub extra_aspects: Vec<String>,
    pub namespace_prefixes: BTreeMap<String, String>,
}

impl PropertyTransform {
    /// Transform metadata read from `source_id` into a pushable bag
    pub fn apply(&self, mut metadata: Metadata, source_id: &str) -> DocumentProperties {
        let properties = &mut metadata.properties;

        for name in REMOVED_PROPERTIES {
            properties.remove(*name);
        }
        for name in &self.filter {
            properties.remove(name);
        }
        for name in FALSE_PROPERTIES {
            properties.insert(name.to_string(), Value::Bool(false));
        }
        properties.retain(|_, value| !value.is_null());

        let mut collections = BTreeMap::new();
        for (name, value) in properties.iter_mut() {
            if let Value::Array(items) = value {
                let values = items.iter().filter_map(collection_entry).collect();
                collections.insert(self.prefixed_name(name), values);
                *value = Value::String(String::new());
            }
        }

        if let Some(content_type) = &self.new_content_type {
            if content_type.contains(':') {
                metadata.type_id = content_type.clone();
            }
        }

        if let Some(property) = &self.source_id_property {
            metadata
                .properties
                .insert(property.clone(), Value::String(source_id.to_string()));
        }

        for aspect in &self.extra_aspects {
            if !metadata.aspects.contains(aspect) {
                metadata.aspects.push(aspect.clone());
            }
        }

        DocumentProperties {
            metadata,
            collections,
        }
    }

    /// `{uri}local` to `prefix:local` when the namespace is known
    pub fn prefixed_name(&self, name: &str) -> String {
        let Some(rest) = name.strip_prefix('{') else {
            return name.to_string();
        };
        match rest.split_once('}') {
            Some((uri, local)) => match self.namespace_prefixes.get(uri) {
                Some(prefix) => format!("{}:{}", prefix, local),
                None => name.to_string(),
            },
            None => name.to_string(),
        }
    }
}

fn collection_entry(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
