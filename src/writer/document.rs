//! Per-document migration
//!
//! Each document goes through the same steps, stopping at the first terminal
//! outcome:
//!
//! 1. Resolve name, type, timestamps and destination folder
//! 2. Skip or replace an existing target document
//! 3. Upload the current version, or the full history oldest to newest
//! 4. Stage relationships for the association pass
//! 5. Validate the written document
//!
//! Everything after the first write runs inside a [`RollbackScope`]. Failures
//! are recorded on the item; they never abort the chunk.

use crate::config::{MigrationConfig, SourceAction};
use crate::error::{DocumentError, DocumentResult, RepositoryError};
use crate::job::{
    AssociationWorkItem, CounterKind, DocumentProperties, DocumentWorkItem, ItemStatus, JobState,
    TargetRef,
};
use crate::repository::{
    ensure_folder, is_major_label, join_path, strip_version_label, Repository, Upload, PROP_CREATED,
    PROP_CREATOR, PROP_MODIFIED, PROP_MODIFIER, PROP_NAME,
};
use crate::writer::association::is_excluded_relation;
use crate::writer::destination::DestinationResolver;
use crate::writer::properties::PropertyTransform;
use crate::writer::rollback::RollbackScope;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Label of the first version of a new target document
const INITIAL_LABEL: &str = "1.0";

/// Writes documents into the target repository
pub struct DocumentWriter {
    config: Arc<MigrationConfig>,
    source: Arc<dyn Repository>,
    target: Arc<dyn Repository>,
    job: Arc<JobState>,
    transform: PropertyTransform,
    destinations: DestinationResolver,
}

impl DocumentWriter {
    pub fn new(
        config: Arc<MigrationConfig>,
        source: Arc<dyn Repository>,
        target: Arc<dyn Repository>,
        job: Arc<JobState>,
    ) -> Self {
        let transform = PropertyTransform {
            filter: config.property_filter.clone(),
            new_content_type: config.new_content_type.clone(),
            source_id_property: config.source_id_property.clone(),
            extra_aspects: config.extra_aspects.clone(),
            namespace_prefixes: config.namespace_prefixes.clone(),
        };
        let destinations = DestinationResolver::new(
            &config.target_root,
            config.rules.clone(),
            config.default_folder.clone(),
            config.path_replacements.clone(),
        );

        Self {
            config,
            source,
            target,
            job,
            transform,
            destinations,
        }
    }

    /// Process every item of a chunk, in order
    pub fn write_chunk(&self, worker: usize, items: Vec<DocumentWorkItem>) -> Vec<DocumentWorkItem> {
        debug!(worker, size = items.len(), "Writing chunk");
        items
            .into_iter()
            .map(|mut item| {
                self.write(worker, &mut item);
                item
            })
            .collect()
    }

    /// Migrate one document and record its outcome
    pub fn write(&self, worker: usize, item: &mut DocumentWorkItem) {
        match self.migrate(item) {
            Ok(()) => self.record_success(worker, item),
            Err(e) => self.record_failure(worker, item, e),
        }
        self.apply_source_action(item);
        item.release_properties();
    }

    fn migrate(&self, item: &mut DocumentWorkItem) -> DocumentResult<()> {
        self.resolve_attributes(item)?;

        if self.skip_or_replace(item)? {
            return Ok(());
        }

        let folder = item
            .destination_folder
            .clone()
            .ok_or(DocumentError::NoDestination)?;
        ensure_folder(self.target.as_ref(), &folder)?;

        let mut scope = RollbackScope::new(self.target.as_ref());
        let written = if self.config.all_versions {
            self.upload_history(item, &folder, &mut scope)
        } else {
            self.upload_current(item, &folder, &mut scope)
        }
        .and_then(|()| self.stage_associations(item))
        .and_then(|()| self.validate(item));

        match written {
            Ok(()) => {
                scope.commit();
                Ok(())
            }
            Err(e) => Err(scope.rollback(e)),
        }
    }

    /// Fill in name, type, timestamps, destination and transformed properties
    fn resolve_attributes(&self, item: &mut DocumentWorkItem) -> DocumentResult<()> {
        let object = self
            .source
            .get_by_id(&item.source_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                what: item.source_id.clone(),
            })?;
        let metadata = self.source.get_metadata(&item.source_id, None)?;

        let file_name = metadata
            .string_property(PROP_NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or(object.name.as_str());
        if file_name.is_empty() {
            return Err(DocumentError::MissingAttribute {
                id: item.source_id.clone(),
                name: PROP_NAME.to_string(),
            });
        }
        item.file_name = Some(file_name.to_string());

        item.created = metadata.string_property(PROP_CREATED).map(str::to_string);
        item.modified = metadata.string_property(PROP_MODIFIED).map(str::to_string);
        item.creator = metadata.string_property(PROP_CREATOR).map(str::to_string);
        item.modifier = metadata.string_property(PROP_MODIFIER).map(str::to_string);
        item.version_label = object.version_label.clone();

        if item.destination_folder.is_none() {
            let folder = if self.config.keep_original_structure {
                join_path(&self.config.target_root, &object.parent_path())
            } else {
                self.destinations.resolve(&metadata)?
            };
            item.destination_folder = Some(folder);
        }

        let properties = self.transform.apply(metadata, &item.source_id);
        item.content_type = Some(properties.metadata.type_id.clone());
        item.properties = Some(properties);
        Ok(())
    }

    /// Returns true when the document is skipped
    fn skip_or_replace(&self, item: &mut DocumentWorkItem) -> DocumentResult<bool> {
        if !self.config.skip_existing && !self.config.replace_existing {
            return Ok(false);
        }

        let path = item.target_path().ok_or(DocumentError::NoDestination)?;
        let Some(existing) = self.target.get_by_path(&path)? else {
            return Ok(false);
        };

        if self.config.skip_existing {
            info!(document = %item.source_id, path = %path, "Document already exists, skipped");
            item.status = ItemStatus::Skipped;
            item.target_ref = Some(TargetRef {
                id: existing.id,
                version_label: existing.version_label.unwrap_or_default(),
            });
            return Ok(true);
        }

        self.target.delete_object(&existing.id)?;
        info!(document = %item.source_id, path = %path, "Existing document deleted for replacement");
        item.target_ref = None;
        item.status = ItemStatus::Replace;
        item.replaced = true;
        Ok(false)
    }

    fn upload_current(
        &self,
        item: &mut DocumentWorkItem,
        folder: &str,
        scope: &mut RollbackScope<'_>,
    ) -> DocumentResult<()> {
        let properties = current_properties(item)?;
        let file_name = item.file_name.as_deref().unwrap_or_default();

        let content = self.source.get_content(&item.source_id, None)?;
        let upload = Upload {
            file_name,
            content_type: &properties.metadata.type_id,
            content: &content,
        };

        let created = self.target.create_document(folder, &upload)?;
        scope.track(&created.id);
        self.push_properties(&created.id, properties)?;

        item.bytes_uploaded += content.len() as u64;
        item.version_count = 1;
        item.target_ref = Some(TargetRef {
            id: created.id,
            version_label: INITIAL_LABEL.to_string(),
        });
        Ok(())
    }

    /// Upload every version oldest first on a single target node
    fn upload_history(
        &self,
        item: &mut DocumentWorkItem,
        folder: &str,
        scope: &mut RollbackScope<'_>,
    ) -> DocumentResult<()> {
        let versions = self.source.get_version_list(&item.source_id)?;
        if versions.is_empty() {
            return self.upload_current(item, folder, scope);
        }

        let current = current_properties(item)?;
        let file_name = item.file_name.as_deref().unwrap_or_default();
        let total = versions.len();
        let mut target_id: Option<String> = None;
        let mut last_label = INITIAL_LABEL.to_string();
        let mut bytes = 0u64;

        for (index, version) in versions.iter().rev().enumerate() {
            let is_last = index + 1 == total;
            let content = self
                .source
                .get_content(&item.source_id, Some(&version.version_ref))?;

            let fetched;
            let properties = if is_last {
                current
            } else {
                let metadata = self
                    .source
                    .get_metadata(&item.source_id, Some(&version.version_ref))?;
                fetched = self.transform.apply(metadata, &item.source_id);
                &fetched
            };

            let upload = Upload {
                file_name,
                content_type: &properties.metadata.type_id,
                content: &content,
            };

            let written = match &target_id {
                None => {
                    let created = self.target.create_document(folder, &upload)?;
                    scope.track(&created.id);
                    created
                }
                Some(id) => self
                    .target
                    .update_version(id, &upload, is_major_label(&version.label))?,
            };
            self.push_properties(&written.id, properties)?;

            debug!(
                document = %item.source_id,
                version = %version.label,
                index = index + 1,
                total,
                "Version uploaded"
            );
            bytes += content.len() as u64;
            last_label = version.label.clone();
            target_id = Some(strip_version_label(&written.id).to_string());
        }

        item.bytes_uploaded += bytes;
        item.version_count = total;
        item.target_ref = target_id.map(|id| TargetRef {
            id,
            version_label: last_label,
        });
        Ok(())
    }

    fn push_properties(&self, target_id: &str, properties: &DocumentProperties) -> DocumentResult<()> {
        self.target.update_properties(target_id, &properties.metadata)?;
        if !properties.collections.is_empty() {
            self.target
                .update_collections(target_id, &properties.collections)?;
        }
        Ok(())
    }

    /// Stage the source relationships for the second pass
    fn stage_associations(&self, item: &mut DocumentWorkItem) -> DocumentResult<()> {
        if !self.config.copy_associations {
            return Ok(());
        }

        let target_from = item.target_ref.as_ref().map(|t| t.id.clone());
        let relationships = self.source.relationships(&item.source_id)?;

        item.associations = relationships
            .into_iter()
            .map(|relationship| {
                let mut association = AssociationWorkItem::new(
                    item.source_id.clone(),
                    relationship.target_id,
                    relationship.relation_type,
                );
                association.target_from_id = target_from.clone();
                if is_excluded_relation(&association.relation_type) {
                    association.status = ItemStatus::Excluded;
                }
                association
            })
            .collect();
        Ok(())
    }

    /// Re-resolve the written document in the target
    fn validate(&self, item: &mut DocumentWorkItem) -> DocumentResult<()> {
        let path = item.target_path().ok_or(DocumentError::NoDestination)?;
        let expected = item
            .target_ref
            .clone()
            .ok_or_else(|| DocumentError::Validation(format!(
                "Document was not written to the target repository, Target Destination Path: {}",
                path
            )))?;

        let Some(found) = self.target.get_by_path(&path)? else {
            return match self.target.get_by_id(&expected.id)? {
                None => Err(DocumentError::Validation(format!(
                    "Document not found in target repository. It has been deleted immediately after being migrated, Target Node ID: {}, Target Destination Path: {}",
                    expected.id, path
                ))),
                Some(moved) => Err(DocumentError::Validation(format!(
                    "Document is not in the expected destination path, Target Node ID: {}, Expected Path: {}, Found Path: {}",
                    expected.id, path, moved.path
                ))),
            };
        };

        if strip_version_label(&found.id) != strip_version_label(&expected.id) {
            return Err(DocumentError::Validation(format!(
                "Document found in the destination path doesn't match the expected node id, Expected: {}, Found: {}, Target Destination Path: {}",
                expected.id, found.id, path
            )));
        }

        if let Some(label) = found.version_label.as_deref() {
            if label != expected.version_label {
                warn!(
                    document = %item.source_id,
                    expected = %expected.version_label,
                    found = %label,
                    "Version label mismatch after migration"
                );
                item.add_message(format!(
                    "Document exists but version doesn't match, Expected: {}, Found: {}",
                    expected.version_label, label
                ));
            }
        }
        Ok(())
    }

    fn record_success(&self, worker: usize, item: &mut DocumentWorkItem) {
        let counters = self.job.counters();

        if item.status == ItemStatus::Skipped {
            counters.increment_all(&[CounterKind::Processed, CounterKind::Skipped]);
            return;
        }

        let processed = counters.increment(CounterKind::Processed);
        counters.increment(CounterKind::Migrated);
        if item.replaced {
            counters.increment(CounterKind::Replaced);
        } else {
            counters.increment(CounterKind::New);
        }
        item.status = ItemStatus::Success;

        debug!(
            worker,
            document = %item.source_id,
            path = ?item.target_path(),
            versions = item.version_count,
            processed,
            "Document migrated"
        );
    }

    fn record_failure(&self, worker: usize, item: &mut DocumentWorkItem, error: DocumentError) {
        let counters = self.job.counters();
        counters.increment_all(&[CounterKind::Processed, CounterKind::Failed]);

        warn!(
            worker,
            document = %item.source_id,
            error = %error,
            "Document migration failed"
        );
        item.fail(error);
    }

    /// Keep, move or delete the source document after its outcome is known
    fn apply_source_action(&self, item: &mut DocumentWorkItem) {
        let (action, outcome) = match item.status {
            ItemStatus::Success => (&self.config.on_success, "success"),
            ItemStatus::Failed => (&self.config.on_error, "error"),
            _ => return,
        };

        let result = match action {
            SourceAction::Keep => return,
            SourceAction::Move(folder) => ensure_folder(self.source.as_ref(), folder)
                .and_then(|f| self.source.move_object(&item.source_id, &f.path)),
            SourceAction::Delete => self.source.delete_object(&item.source_id),
        };

        if let Err(e) = result {
            warn!(document = %item.source_id, outcome, error = %e, "Source action failed");
            item.add_message(format!(
                "Unable to apply the {} action to the source document: {}",
                outcome, e
            ));
        }
    }
}

fn current_properties(item: &DocumentWorkItem) -> DocumentResult<&DocumentProperties> {
    item.properties
        .as_ref()
        .ok_or_else(|| DocumentError::MissingAttribute {
            id: item.source_id.clone(),
            name: "properties".into(),
        })
}
