//! Second-pass relationship replication

use crate::job::{AssociationWorkItem, CounterKind, ItemStatus, JobState};
use crate::repository::{strip_version_label, Repository, ASSOC_ORIGINAL, ASSOC_WORKING_COPY_LINK};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Relationship types that are never replicated
pub const EXCLUDED_RELATIONS: &[&str] = &[ASSOC_WORKING_COPY_LINK, ASSOC_ORIGINAL];

pub fn is_excluded_relation(relation_type: &str) -> bool {
    EXCLUDED_RELATIONS.contains(&relation_type)
}

/// Outcome tally of the association pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssociationSummary {
    pub created: u64,
    pub skipped: u64,
    pub excluded: u64,
    pub failed: u64,
}

impl AssociationSummary {
    fn record(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Success => self.created += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Excluded => self.excluded += 1,
            ItemStatus::Failed => self.failed += 1,
            _ => {}
        }
    }

    /// Add another tally to this one
    pub fn merge(&mut self, other: &AssociationSummary) {
        self.created += other.created;
        self.skipped += other.skipped;
        self.excluded += other.excluded;
        self.failed += other.failed;
    }

    pub fn total(&self) -> u64 {
        self.created + self.skipped + self.excluded + self.failed
    }
}

/// Creates staged relationships in the target repository
pub struct AssociationWriter {
    target: Arc<dyn Repository>,
    job: Arc<JobState>,
}

impl AssociationWriter {
    pub fn new(target: Arc<dyn Repository>, job: Arc<JobState>) -> Self {
        Self { target, job }
    }

    /// Resolve target ids from `targets` (source id to target id) and write
    pub fn write_chunk(
        &self,
        worker: usize,
        items: &mut [AssociationWorkItem],
        targets: &HashMap<String, String>,
    ) -> AssociationSummary {
        let mut summary = AssociationSummary::default();
        for item in items.iter_mut() {
            resolve_targets(item, targets);
            self.write(item);
            summary.record(item.status);
        }
        debug!(worker, created = summary.created, failed = summary.failed, "Association chunk written");
        summary
    }

    /// Create one relationship, leaving finished items untouched
    pub fn write(&self, item: &mut AssociationWorkItem) {
        if is_excluded_relation(&item.relation_type) {
            item.status = ItemStatus::Excluded;
            return;
        }
        if matches!(item.status, ItemStatus::Success | ItemStatus::Skipped) {
            return;
        }

        let (from, to) = match (item.target_from_id.clone(), item.target_to_id.clone()) {
            (Some(from), Some(to)) => (from, to),
            (None, _) => {
                let missing = item.source_from_id.clone();
                return self.fail(item, format!("Related document was not migrated: {}", missing));
            }
            (_, None) => {
                let missing = item.source_to_id.clone();
                return self.fail(item, format!("Related document was not migrated: {}", missing));
            }
        };

        match self.target.create_relationship(&from, &to, &item.relation_type) {
            Ok(()) => {
                item.status = ItemStatus::Success;
            }
            Err(e) if e.is_already_exists() => {
                debug!(from = %from, to = %to, relation = %item.relation_type, "Relationship already exists");
                item.status = ItemStatus::Skipped;
            }
            Err(e) => self.fail(item, e.to_string()),
        }
    }

    fn fail(&self, item: &mut AssociationWorkItem, message: String) {
        warn!(
            from = %item.source_from_id,
            to = %item.source_to_id,
            relation = %item.relation_type,
            error = %message,
            "Relationship not created"
        );
        self.job.counters().increment(CounterKind::Failed);
        item.status = ItemStatus::Failed;
        item.message = Some(message);
    }
}

fn resolve_targets(item: &mut AssociationWorkItem, targets: &HashMap<String, String>) {
    if item.target_from_id.is_none() {
        item.target_from_id = targets.get(strip_version_label(&item.source_from_id)).cloned();
    }
    if item.target_to_id.is_none() {
        item.target_to_id = targets.get(strip_version_label(&item.source_to_id)).cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;

    fn writer() -> (Arc<MemoryRepository>, Arc<JobState>, AssociationWriter) {
        let target = Arc::new(MemoryRepository::new("target"));
        let job = Arc::new(JobState::new(None, &[]));
        let writer = AssociationWriter::new(target.clone(), Arc::clone(&job));
        (target, job, writer)
    }

    #[test]
    fn test_working_copy_link_always_excluded() {
        let (target, _, writer) = writer();
        let mut item = AssociationWorkItem::new("a", "b", ASSOC_WORKING_COPY_LINK);
        item.status = ItemStatus::Success;
        item.target_from_id = Some("x".into());
        item.target_to_id = Some("y".into());

        writer.write(&mut item);

        assert_eq!(item.status, ItemStatus::Excluded);
        assert_eq!(target.call_count("create_relationship"), 0);
    }

    #[test]
    fn test_create_then_skip_existing() {
        let (target, job, writer) = writer();
        let a = target.add_document("/", "a.txt", b"a");
        let b = target.add_document("/", "b.txt", b"b");
        let targets: HashMap<String, String> =
            [("src-a".to_string(), a.clone()), ("src-b".to_string(), b.clone())].into();

        let mut items = vec![
            AssociationWorkItem::new("src-a", "src-b", "R:cm:references"),
            AssociationWorkItem::new("src-a", "src-b", "R:cm:references"),
        ];
        let summary = writer.write_chunk(0, &mut items, &targets);

        assert_eq!(items[0].status, ItemStatus::Success);
        assert_eq!(items[1].status, ItemStatus::Skipped);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(job.counters().snapshot().failed, 0);
    }

    #[test]
    fn test_finished_items_not_retried() {
        let (target, _, writer) = writer();
        let mut item = AssociationWorkItem::new("src-a", "src-b", "R:cm:references");
        item.status = ItemStatus::Skipped;

        writer.write(&mut item);

        assert_eq!(item.status, ItemStatus::Skipped);
        assert_eq!(target.call_count("create_relationship"), 0);
    }

    #[test]
    fn test_unmigrated_end_fails() {
        let (_, job, writer) = writer();
        let targets: HashMap<String, String> = [("src-a".to_string(), "t-a".to_string())].into();

        let mut items = vec![AssociationWorkItem::new("src-a", "src-missing", "R:cm:references")];
        let summary = writer.write_chunk(0, &mut items, &targets);

        assert_eq!(summary.failed, 1);
        assert_eq!(
            items[0].message.as_deref(),
            Some("Related document was not migrated: src-missing")
        );
        assert_eq!(job.counters().snapshot().failed, 1);
    }

    #[test]
    fn test_target_failure_recorded() {
        let (target, _, writer) = writer();
        target.fail_relationships();
        let mut item = AssociationWorkItem::new("src-a", "src-b", "R:cm:references");
        item.target_from_id = Some("t-a".into());
        item.target_to_id = Some("t-b".into());

        writer.write(&mut item);

        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.message.is_some());
    }
}
