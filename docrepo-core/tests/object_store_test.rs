//! End-to-end scenarios across the object store, the ACL engine and the
//! file-backed persistence mirror.

use docrepo_core::acl::{Ace, Acl, AclPropagation, Permission};
use docrepo_core::config::RepositoryConfig;
use docrepo_core::error::StoreError;
use docrepo_core::persistence::file::FilePersistence;
use docrepo_core::storage::object::{ContentStream, PropertyValue, VersioningState};
use docrepo_core::storage::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

fn store() -> ObjectStore {
    ObjectStore::in_memory(RepositoryConfig::new("integration"))
}

#[test]
fn document_lifecycle_under_a_folder_tree() {
    let s = store();
    let root = s.root_id().to_string();
    let docs = s
        .create_folder("docs", HashMap::new(), "alice", Some(&root), Vec::new(), None, None)
        .unwrap();
    let docs_id = docs.read().id.clone();

    let mut props = HashMap::new();
    props.insert(
        "title".to_string(),
        PropertyValue::String("Quarterly report".to_string()),
    );
    let report = s
        .create_document(
            "report.txt",
            props,
            "alice",
            Some(&docs_id),
            Some(ContentStream::new("report.txt", "text/plain", &b"Q3 numbers"[..])),
            Vec::new(),
            None,
            None,
        )
        .unwrap();
    let report_id = report.read().id.clone();

    // reachable through both indices
    let via_path = s.get_object_by_path("/docs/report.txt", "alice").unwrap();
    assert_eq!(via_path.read().id, report_id);
    let content = s.get_content(&report_id, 0, None).unwrap().unwrap();
    assert_eq!(content.data.as_ref(), b"Q3 numbers");
    assert_eq!(content.mime_type, "text/plain");

    // rename, then move, then delete; the path index follows every step
    s.rename(&report_id, "q3.txt", "alice").unwrap();
    assert!(s.get_object_by_path("/docs/report.txt", "alice").is_none());
    assert!(s.get_object_by_path("/docs/q3.txt", "alice").is_some());

    s.move_object(&report_id, &docs_id, &root, "alice").unwrap();
    assert!(s.get_object_by_path("/q3.txt", "alice").is_some());

    s.delete_object(&report_id, false, "alice").unwrap();
    assert!(s.get_object_by_id(&report_id).is_none());
    assert!(s.get_object_by_path("/q3.txt", "alice").is_none());

    // empty folder can go now
    s.delete_object(&docs_id, false, "alice").unwrap();
    assert_eq!(s.get_object_count(), 1);
}

#[test]
fn concurrent_folder_creates_converge_on_one_object() {
    let s = Arc::new(store());
    let root = s.root_id().to_string();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let s = Arc::clone(&s);
            let root = root.clone();
            thread::spawn(move || {
                s.create_folder(
                    "shared",
                    HashMap::new(),
                    "alice",
                    Some(&root),
                    Vec::new(),
                    None,
                    None,
                )
                .map(|arc| arc.read().id.clone())
            })
        })
        .collect();

    let ids: Vec<String> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    assert!(ids.iter().all(|id| id == &ids[0]));
    assert_eq!(s.get_object_count(), 2);
}

#[test]
fn concurrent_document_creates_admit_exactly_one() {
    let s = Arc::new(store());
    let root = s.root_id().to_string();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let s = Arc::clone(&s);
            let root = root.clone();
            thread::spawn(move || {
                s.create_document(
                    "contested.txt",
                    HashMap::new(),
                    "alice",
                    Some(&root),
                    None,
                    Vec::new(),
                    None,
                    None,
                )
                .map(|_| ())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            r.as_ref().unwrap_err(),
            StoreError::NameConstraintViolation(_)
        ));
    }
    assert_eq!(s.get_object_count(), 2);
}

#[test]
fn acl_handles_deduplicate_across_objects() {
    let s = store();
    let root = s.root_id().to_string();
    let a = s
        .create_folder("a", HashMap::new(), "alice", Some(&root), Vec::new(), None, None)
        .unwrap();
    let b = s
        .create_folder("b", HashMap::new(), "alice", Some(&root), Vec::new(), None, None)
        .unwrap();
    let a_id = a.read().id.clone();
    let b_id = b.read().id.clone();

    let grant = Acl::from_aces([
        Ace::new("alice", Permission::All),
        Ace::new("bob", Permission::Read),
    ]);
    let revoke = Acl::from_aces([Ace::default_ace()]);
    s.apply_acl(&a_id, Some(&grant), Some(&revoke), AclPropagation::ObjectOnly, "Admin")
        .unwrap();
    s.apply_acl(&b_id, Some(&grant), Some(&revoke), AclPropagation::ObjectOnly, "Admin")
        .unwrap();

    let ha = s.get_object_by_id(&a_id).unwrap().read().acl_id;
    let hb = s.get_object_by_id(&b_id).unwrap().read().acl_id;
    assert_eq!(ha, hb);
    assert_ne!(ha, 0);

    // handle scans: bob may read both, write neither
    let readable = s.get_all_acls_for_user("bob", Permission::Read);
    assert!(readable.contains(&ha));
    let writable = s.get_all_acls_for_user("bob", Permission::Write);
    assert!(!writable.contains(&ha));
    // the open-to-all handle is always readable
    assert!(readable.contains(&0));
}

#[test]
fn version_series_full_lifecycle() {
    let s = store();
    let root = s.root_id().to_string();
    let v1 = s
        .create_versioned_document(
            "design.md",
            HashMap::new(),
            "alice",
            Some(&root),
            Vec::new(),
            None,
            None,
            Some(ContentStream::new("design.md", "text/markdown", &b"draft"[..])),
            VersioningState::Major,
        )
        .unwrap();
    let series = v1.read().version_info().unwrap().series_id.clone();
    assert_eq!(v1.read().version_info().unwrap().label(), "V 1.0");

    // checkout starts from the latest content
    let pwc = s.check_out(&series, "alice").unwrap();
    assert_eq!(pwc.read().content().unwrap().data.as_ref(), b"draft");
    assert_eq!(s.get_checked_out_documents("alice").len(), 1);

    let v11 = s
        .check_in(
            &series,
            "alice",
            Some(ContentStream::new("design.md", "text/markdown", &b"final"[..])),
            HashMap::new(),
            false,
            Some("address review".to_string()),
        )
        .unwrap();
    assert_eq!(v11.read().version_info().unwrap().label(), "V 1.1");
    assert!(s.get_checked_out_documents("alice").is_empty());

    // latest version is what a folder listing shows
    let listing = s.get_children(&root, None, 0, "alice", false).unwrap();
    assert_eq!(listing.items[0].read().id, v11.read().id);

    // terminal delete: the whole series disappears at once
    let v11_id = v11.read().id.clone();
    s.delete_object(&v11_id, true, "alice").unwrap();
    assert!(s.get_object_by_id(&series).is_none());
    assert_eq!(s.get_object_count(), 1);
}

#[test]
fn acl_propagation_stops_at_foreign_subtrees() {
    let s = store();
    let root = s.root_id().to_string();
    let projects = s
        .create_folder("projects", HashMap::new(), "alice", Some(&root), Vec::new(), None, None)
        .unwrap();
    let projects_id = projects.read().id.clone();
    let mine = s
        .create_folder("mine", HashMap::new(), "alice", Some(&projects_id), Vec::new(), None, None)
        .unwrap();
    let mine_id = mine.read().id.clone();
    let theirs = s
        .create_folder("theirs", HashMap::new(), "bob", Some(&projects_id), Vec::new(), None, None)
        .unwrap();
    let theirs_id = theirs.read().id.clone();
    let their_doc = s
        .create_document(
            "secret.txt",
            HashMap::new(),
            "bob",
            Some(&theirs_id),
            None,
            Vec::new(),
            None,
            None,
        )
        .unwrap();
    let their_doc_id = their_doc.read().id.clone();

    // bob fences off his subtree first
    let bob_only = Acl::from_aces([Ace::new("bob", Permission::All)]);
    let revoke = Acl::from_aces([Ace::default_ace()]);
    s.apply_acl(&theirs_id, Some(&bob_only), Some(&revoke), AclPropagation::Propagate, "Admin")
        .unwrap();

    // alice propagates her grant from the top; bob's subtree is untouched
    let alice_grant = Acl::from_aces([Ace::new("alice", Permission::All)]);
    s.apply_acl(
        &projects_id,
        Some(&alice_grant),
        Some(&revoke),
        AclPropagation::Propagate,
        "alice",
    )
    .unwrap();

    let mine_acl = s.get_acl(s.get_object_by_id(&mine_id).unwrap().read().acl_id);
    assert!(mine_acl.grants("alice", Permission::All));

    let secret_acl = s.get_acl(s.get_object_by_id(&their_doc_id).unwrap().read().acl_id);
    assert!(!secret_acl.grants("alice", Permission::Read));
    assert!(secret_acl.grants("bob", Permission::All));
}

#[test]
fn file_persistence_mirrors_content_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(FilePersistence::new(dir.path()).unwrap());
    let s = ObjectStore::new(RepositoryConfig::new("mirrored"), persistence.clone());
    let root = s.root_id().to_string();

    let doc = s
        .create_document(
            "mirrored.txt",
            HashMap::new(),
            "alice",
            Some(&root),
            Some(ContentStream::new("mirrored.txt", "text/plain", &b"on disk"[..])),
            Vec::new(),
            None,
            None,
        )
        .unwrap();
    let doc_id = doc.read().id.clone();

    use docrepo_core::persistence::PersistenceManager;
    let bytes = persistence.read_content(&doc_id).unwrap().unwrap();
    assert_eq!(bytes.as_ref(), b"on disk");
    let record = persistence.read_metadata(&doc_id).unwrap().unwrap();
    assert_eq!(record.name, "mirrored.txt");
    assert_eq!(record.parent_ids, vec![root]);

    s.delete_object(&doc_id, false, "alice").unwrap();
    assert!(persistence.read_content(&doc_id).unwrap().is_none());
    assert!(persistence.read_metadata(&doc_id).unwrap().is_none());
}

#[test]
fn reads_proceed_while_a_mutation_is_in_flight() {
    let s = Arc::new(store());
    let root = s.root_id().to_string();
    for i in 0..20 {
        s.create_document(
            &format!("doc-{i:02}.txt"),
            HashMap::new(),
            "alice",
            Some(&root),
            None,
            Vec::new(),
            None,
            None,
        )
        .unwrap();
    }

    let writer = {
        let s = Arc::clone(&s);
        let root = root.clone();
        thread::spawn(move || {
            for i in 20..40 {
                s.create_document(
                    &format!("doc-{i:02}.txt"),
                    HashMap::new(),
                    "alice",
                    Some(&root),
                    None,
                    Vec::new(),
                    None,
                    None,
                )
                .unwrap();
            }
        })
    };
    let reader = {
        let s = Arc::clone(&s);
        let root = root.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                let page = s.get_children(&root, Some(10), 0, "alice", false).unwrap();
                assert!(page.total >= 20);
                assert!(s.get_object_by_path("/doc-00.txt", "alice").is_some());
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(s.get_object_count(), 41);
}
