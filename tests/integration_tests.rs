//! End-to-end migration runs
//!
//! Most tests drive the coordinator against in-memory repositories so faults
//! can be injected; the last ones use directory-backed repositories.

use doc_migrator::config::{MigrationConfig, Profile, SourceAction};
use doc_migrator::error::MigrateError;
use doc_migrator::pipeline::{MigrationCoordinator, MigrationResult, RunStatus};
use doc_migrator::repository::{FsRepository, MemoryRepository, Repository};
use doc_migrator::writer::FolderStructureRule;
use serde_json::json;
use std::fs;
use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::{tempdir, NamedTempFile};

struct Fixture {
    source: Arc<MemoryRepository>,
    target: Arc<MemoryRepository>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            source: Arc::new(MemoryRepository::new("source")),
            target: Arc::new(MemoryRepository::new("target")),
        }
    }

    fn coordinator(&self, config: MigrationConfig) -> MigrationCoordinator {
        let source: Arc<dyn Repository> = self.source.clone();
        let target: Arc<dyn Repository> = self.target.clone();
        MigrationCoordinator::new(config, source, target).unwrap()
    }

    fn run(&self, config: MigrationConfig) -> MigrationResult {
        self.coordinator(config).run().unwrap()
    }
}

fn small_chunks() -> MigrationConfig {
    MigrationConfig {
        page_size: 3,
        chunk_size: 2,
        thread_count: 4,
        ..MigrationConfig::default()
    }
}

#[test]
fn test_folder_tree_migrated_exactly_once() {
    let fx = Fixture::new();
    for i in 0..7 {
        fx.source.add_document("/a", &format!("a{}.txt", i), b"a");
    }
    for i in 0..5 {
        fx.source.add_document("/a/b", &format!("b{}.txt", i), b"b");
    }
    for i in 0..4 {
        fx.source.add_document("/c", &format!("c{}.txt", i), b"c");
    }
    fx.source.add_folder("/empty");

    let result = fx.run(small_chunks());

    assert_eq!(result.status, RunStatus::Success);
    assert!(result.completed);
    assert_eq!(result.counters.extracted_docs, 16);
    assert_eq!(result.counters.processed, 16);
    assert_eq!(result.counters.migrated, 16);
    assert_eq!(result.counters.new, 16);
    assert_eq!(result.counters.failed, 0);
    assert_eq!(fx.target.call_count("create_document"), 16);
    assert_eq!(fx.target.document_count(), 16);

    assert_eq!(fx.target.content_at("/a/a6.txt").unwrap(), b"a");
    assert_eq!(fx.target.content_at("/a/b/b0.txt").unwrap(), b"b");
    assert_eq!(fx.target.content_at("/c/c3.txt").unwrap(), b"c");
    assert!(fx.target.get_by_path("/empty").unwrap().is_some());
}

#[test]
fn test_working_copies_and_excluded_folders_skipped() {
    let fx = Fixture::new();
    fx.source.add_document("/a", "keep.txt", b"x");
    fx.source.add_working_copy("/a", "draft.txt");
    fx.source.add_document("/a/tmp", "scratch.txt", b"x");

    let result = fx.run(MigrationConfig {
        excluded_folders: vec!["tmp".into()],
        ..small_chunks()
    });

    assert_eq!(result.counters.extracted_docs, 1);
    assert!(fx.target.content_at("/a/keep.txt").is_some());
    assert!(fx.target.content_at("/a/draft.txt").is_none());
    assert!(fx.target.get_by_path("/a/tmp").unwrap().is_none());
}

#[test]
fn test_target_root_prefixes_mirrored_tree() {
    let fx = Fixture::new();
    fx.source.add_document("/Sites/hr", "policy.pdf", b"pdf");

    let result = fx.run(MigrationConfig {
        source_folder: "/Sites".into(),
        target_root: "/Imported".into(),
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(fx.target.content_at("/Imported/Sites/hr/policy.pdf").unwrap(), b"pdf");
}

#[test]
fn test_existing_document_skipped() {
    let fx = Fixture::new();
    fx.source.add_document("/a", "doc.txt", b"new");
    fx.target.add_document("/a", "doc.txt", b"old");

    let result = fx.run(MigrationConfig {
        skip_existing: true,
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.counters.skipped, 1);
    assert_eq!(result.counters.migrated, 0);
    assert_eq!(fx.target.call_count("create_document"), 0);
    assert_eq!(fx.target.content_at("/a/doc.txt").unwrap(), b"old");
}

#[test]
fn test_existing_document_replaced() {
    let fx = Fixture::new();
    fx.source.add_document("/a", "doc.txt", b"new");
    fx.target.add_document("/a", "doc.txt", b"old");

    let result = fx.run(MigrationConfig {
        replace_existing: true,
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.counters.migrated, 1);
    assert_eq!(result.counters.replaced, 1);
    assert_eq!(result.counters.new, 0);
    assert_eq!(fx.target.call_count("delete_object"), 1);
    assert_eq!(fx.target.content_at("/a/doc.txt").unwrap(), b"new");
}

#[test]
fn test_existing_document_without_policy_fails() {
    let fx = Fixture::new();
    let id = fx.source.add_document("/a", "doc.txt", b"new");
    fx.target.add_document("/a", "doc.txt", b"old");

    let result = fx.run(small_chunks());

    assert_eq!(result.status, RunStatus::Error);
    assert_eq!(result.counters.failed, 1);
    assert_eq!(result.failed_documents.len(), 1);
    assert_eq!(result.failed_documents[0].source_id, id);
    assert_eq!(fx.target.content_at("/a/doc.txt").unwrap(), b"old");
}

#[test]
fn test_version_history_migrated_in_order() {
    let fx = Fixture::new();
    fx.source.add_versioned_document(
        "/a",
        "doc.txt",
        &[("1.0", b"v1"), ("1.1", b"v2"), ("1.2", b"v3"), ("2.0", b"v4")],
    );

    let result = fx.run(MigrationConfig {
        all_versions: true,
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(fx.target.labels_at("/a/doc.txt"), vec!["1.0", "1.1", "1.2", "2.0"]);
    assert_eq!(fx.target.content_at("/a/doc.txt").unwrap(), b"v4");
    assert_eq!(result.bytes_uploaded, 8);
}

#[test]
fn test_current_version_only_by_default() {
    let fx = Fixture::new();
    fx.source
        .add_versioned_document("/a", "doc.txt", &[("1.0", b"v1"), ("2.0", b"v2")]);

    fx.run(small_chunks());

    assert_eq!(fx.target.labels_at("/a/doc.txt"), vec!["1.0"]);
    assert_eq!(fx.target.content_at("/a/doc.txt").unwrap(), b"v2");
}

#[test]
fn test_failed_version_upload_rolled_back() {
    let fx = Fixture::new();
    let id = fx.source.add_versioned_document(
        "/a",
        "doc.txt",
        &[("1.0", b"v1"), ("1.1", b"v2"), ("2.0", b"v3")],
    );
    fx.target.fail_upload_number(2);

    let result = fx.run(MigrationConfig {
        all_versions: true,
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Error);
    assert_eq!(result.counters.failed, 1);
    assert_eq!(result.failed_documents[0].source_id, id);
    assert_eq!(fx.target.call_count("delete_object"), 1);
    assert_eq!(fx.target.document_count(), 0);
}

#[test]
fn test_properties_carried_to_target() {
    let fx = Fixture::new();
    let id = fx.source.add_document("/a", "doc.txt", b"x");
    fx.source.set_type(&id, "acme:contract", &["cm:titled"]);
    fx.source.set_properties(
        &id,
        None,
        json!({
            "{http://www.alfresco.org/model/content/1.0}title": "Lease",
            "acme:amount": 1200
        })
        .as_object()
        .cloned()
        .unwrap(),
    );

    let result = fx.run(MigrationConfig {
        extra_aspects: vec!["acme:migrated".into()],
        ..small_chunks()
    });
    assert_eq!(result.status, RunStatus::Success);

    let written = fx.target.get_by_path("/a/doc.txt").unwrap().unwrap();
    let metadata = fx.target.get_metadata(&written.id, None).unwrap();
    assert_eq!(metadata.type_id, "acme:contract");
    assert!(metadata.aspects.iter().any(|a| a == "cm:titled"));
    assert!(metadata.aspects.iter().any(|a| a == "acme:migrated"));
    assert_eq!(
        metadata.properties["{http://www.alfresco.org/model/content/1.0}title"],
        json!("Lease")
    );
    assert_eq!(metadata.properties["acme:amount"], json!(1200));
}

#[test]
fn test_rules_decide_destination() {
    let fx = Fixture::new();
    let coded = fx.source.add_document("/inbox", "coded.txt", b"x");
    fx.source.set_properties(
        &coded,
        None,
        json!({"acme:code": "AB123"}).as_object().cloned().unwrap(),
    );
    fx.source.add_document("/inbox", "plain.txt", b"x");

    let result = fx.run(MigrationConfig {
        target_root: "/Archive".into(),
        rules: vec![FolderStructureRule::Property {
            properties: vec!["acme:code".into()],
            levels: 2,
            include_last_level: true,
            date_format: None,
        }],
        default_folder: Some("/Unsorted".into()),
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Success);
    assert!(fx.target.content_at("/Archive/A/B/AB123/coded.txt").is_some());
    assert!(fx.target.content_at("/Archive/Unsorted/plain.txt").is_some());
}

#[test]
fn test_query_profile() {
    let fx = Fixture::new();
    fx.source.add_document("/a", "one.pdf", b"1");
    fx.source.add_document("/a/b", "two.pdf", b"2");
    fx.source.add_document("/a", "three.txt", b"3");
    fx.source.add_document("/tmp", "four.pdf", b"4");

    let result = fx.run(MigrationConfig {
        profile: Profile::Query,
        query: Some(r"\.pdf$".into()),
        keep_original_structure: true,
        excluded_folders: vec!["tmp".into()],
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.counters.migrated, 2);
    assert!(fx.target.content_at("/a/one.pdf").is_some());
    assert!(fx.target.content_at("/a/b/two.pdf").is_some());
    assert!(fx.target.content_at("/a/three.txt").is_none());
    assert!(fx.target.content_at("/tmp/four.pdf").is_none());
}

#[test]
fn test_invalid_query_reported_as_failure() {
    let fx = Fixture::new();
    fx.source.add_document("/a", "one.pdf", b"1");

    let result = fx.run(MigrationConfig {
        profile: Profile::Query,
        query: Some("(unclosed".into()),
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Error);
    assert_eq!(result.counters.failed, 1);
    assert_eq!(result.counters.processed, 0);
}

#[test]
fn test_failed_profile_retries_listed_ids() {
    let fx = Fixture::new();
    let first = fx.source.add_document("/a", "first.txt", b"1");
    fx.source.add_document("/a", "not-listed.txt", b"2");

    let mut list = NamedTempFile::new().unwrap();
    writeln!(list, "# retry after outage").unwrap();
    writeln!(list, "{}", first).unwrap();
    writeln!(list, "missing-id").unwrap();

    let result = fx.run(MigrationConfig {
        profile: Profile::Failed,
        failed_list: Some(list.path().to_path_buf()),
        keep_original_structure: true,
        ..small_chunks()
    });

    assert_eq!(result.counters.extracted_docs, 2);
    assert_eq!(result.counters.migrated, 1);
    assert_eq!(result.counters.failed, 1);
    assert_eq!(result.failed_documents[0].source_id, "missing-id");
    assert!(fx.target.content_at("/a/first.txt").is_some());
    assert!(fx.target.content_at("/a/not-listed.txt").is_none());
}

#[test]
fn test_source_actions_after_migration() {
    let fx = Fixture::new();
    fx.source.add_document("/a", "good.txt", b"1");
    fx.source.add_document("/a", "bad.txt", b"2");
    fx.target.add_document("/a", "bad.txt", b"taken");

    let result = fx.run(MigrationConfig {
        source_folder: "/a".into(),
        on_success: SourceAction::Move("/Done".into()),
        on_error: SourceAction::Move("/Errors".into()),
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Error);
    assert!(fx.source.get_by_path("/Done/good.txt").unwrap().is_some());
    assert!(fx.source.get_by_path("/Errors/bad.txt").unwrap().is_some());
    assert!(fx.source.get_by_path("/a/good.txt").unwrap().is_none());
}

#[test]
fn test_association_pass() {
    let fx = Fixture::new();
    let a = fx.source.add_document("/a", "a.txt", b"a");
    let b = fx.source.add_document("/a", "b.txt", b"b");
    let hidden = fx.source.add_document("/private", "c.txt", b"c");
    fx.source.create_relationship(&a, &b, "R:cm:references").unwrap();
    fx.source.create_relationship(&a, &hidden, "R:cm:references").unwrap();
    fx.source.create_relationship(&a, &b, "R:cm:workingcopylink").unwrap();

    let result = fx.run(MigrationConfig {
        copy_associations: true,
        excluded_folders: vec!["private".into()],
        ..small_chunks()
    });

    assert_eq!(result.associations.created, 1);
    assert_eq!(result.associations.excluded, 1);
    assert_eq!(result.associations.failed, 1);
    assert_eq!(result.counters.migrated, 2);
    assert_eq!(result.counters.failed, 1);
    assert_eq!(result.status, RunStatus::Error);

    let target_a = fx.target.get_by_path("/a/a.txt").unwrap().unwrap();
    let target_b = fx.target.get_by_path("/a/b.txt").unwrap().unwrap();
    let relationships = fx.target.relationships(&target_a.id).unwrap();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].target_id, target_b.id);
    assert_eq!(relationships[0].relation_type, "R:cm:references");
}

#[test]
fn test_folder_permissions_copied() {
    let fx = Fixture::new();
    let folder = fx.source.add_folder("/team");
    fx.source.add_document("/team", "doc.txt", b"x");
    let acl = doc_migrator::repository::Permissions {
        inherited: false,
        direct: vec![doc_migrator::repository::PermissionEntry {
            authority: "GROUP_team".into(),
            role: "Collaborator".into(),
        }],
    };
    fx.source.set_permissions(&folder, &acl).unwrap();

    let result = fx.run(MigrationConfig {
        copy_permissions: true,
        ..small_chunks()
    });

    assert_eq!(result.status, RunStatus::Success);
    let mirrored = fx.target.get_by_path("/team").unwrap().unwrap();
    assert_eq!(fx.target.get_permissions(&mirrored.id).unwrap(), acl);
}

#[test]
fn test_interrupted_run_stops_before_reading() {
    let fx = Fixture::new();
    fx.source.add_document("/a", "doc.txt", b"x");

    let coordinator = fx.coordinator(MigrationConfig {
        copy_associations: true,
        ..small_chunks()
    });
    coordinator.shutdown_flag().store(true, Ordering::SeqCst);
    let result = coordinator.run().unwrap();

    assert!(!result.completed);
    assert_eq!(result.counters.processed, 0);
    assert_eq!(fx.target.call_count("create_document"), 0);
    assert_eq!(fx.source.call_count("close"), 1);
    assert_eq!(fx.target.call_count("close"), 1);
}

#[test]
fn test_repositories_closed_once() {
    let fx = Fixture::new();
    for i in 0..6 {
        fx.source.add_document("/a", &format!("{}.txt", i), b"x");
    }

    fx.run(small_chunks());

    assert_eq!(fx.source.call_count("close"), 1);
    assert_eq!(fx.target.call_count("close"), 1);
    assert_eq!(fx.target.calls().last().map(String::as_str), Some("close"));
}

#[test]
fn test_unreachable_repository_rejected() {
    let dir = tempdir().unwrap();
    let source: Arc<dyn Repository> = Arc::new(FsRepository::open("source", dir.path()));
    let target: Arc<dyn Repository> =
        Arc::new(FsRepository::open("target", dir.path().join("missing")));

    let err = MigrationCoordinator::new(MigrationConfig::default(), source, target)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        MigrateError::Connectivity { ref repository, .. } if repository == "target"
    ));
}

#[test]
fn test_missing_start_folder_is_fatal() {
    let fx = Fixture::new();
    let result = fx.coordinator(MigrationConfig {
        source_folder: "/nowhere".into(),
        ..small_chunks()
    })
    .run();

    assert!(result.is_err());
    assert_eq!(fx.source.call_count("close"), 1);
    assert_eq!(fx.target.call_count("close"), 1);
}

#[test]
fn test_directory_repositories_end_to_end() {
    let source_dir = tempdir().unwrap();
    let target_dir = tempdir().unwrap();
    fs::create_dir_all(source_dir.path().join("reports/2024")).unwrap();
    fs::write(source_dir.path().join("reports/summary.txt"), b"summary").unwrap();
    fs::write(source_dir.path().join("reports/2024/q1.csv"), b"a,b\n1,2\n").unwrap();

    let source: Arc<dyn Repository> = Arc::new(FsRepository::open("source", source_dir.path()));
    let target: Arc<dyn Repository> = Arc::new(FsRepository::open("target", target_dir.path()));
    let result = MigrationCoordinator::new(small_chunks(), source, target)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.counters.migrated, 2);
    assert_eq!(result.bytes_uploaded, 15);
    assert_eq!(
        fs::read(target_dir.path().join("reports/summary.txt")).unwrap(),
        b"summary"
    );
    assert_eq!(
        fs::read(target_dir.path().join("reports/2024/q1.csv")).unwrap(),
        b"a,b\n1,2\n"
    );
    assert!(target_dir.path().join("reports/.repo/summary.txt.json").exists());
}

#[test]
fn test_directory_rerun_skips_existing() {
    let source_dir = tempdir().unwrap();
    let target_dir = tempdir().unwrap();
    fs::create_dir(source_dir.path().join("docs")).unwrap();
    fs::write(source_dir.path().join("docs/a.txt"), b"a").unwrap();

    let run = |config: MigrationConfig| {
        let source: Arc<dyn Repository> = Arc::new(FsRepository::open("source", source_dir.path()));
        let target: Arc<dyn Repository> = Arc::new(FsRepository::open("target", target_dir.path()));
        MigrationCoordinator::new(config, source, target)
            .unwrap()
            .run()
            .unwrap()
    };

    let first = run(small_chunks());
    assert_eq!(first.counters.migrated, 1);

    let second = run(MigrationConfig {
        skip_existing: true,
        ..small_chunks()
    });
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(second.counters.skipped, 1);
    assert_eq!(second.counters.migrated, 0);
}
