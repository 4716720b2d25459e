// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! End-to-end organize scenarios against a real SQLite catalog

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use arquivista::catalog::{ArchiveRecord, CatalogStore, NewRecord, RecordId};
use arquivista::{
    ArquivistaError, CategoryRules, CollisionPolicy, Database, FileFailure, FileOutcome,
    Organizer, Owner, Result, Rollback, SkipReason,
};
use tempfile::TempDir;

fn owner(name: &str) -> Owner {
    Owner::new(name).unwrap()
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn organizer_in(tmp: &TempDir) -> Organizer<Database> {
    Organizer::new(
        Database::in_memory().unwrap(),
        CategoryRules::default(),
        tmp.path().join("storage"),
    )
}

/// Catalog whose appends can be switched off
struct FlakyStore {
    inner: Database,
    failing: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: Database::in_memory().unwrap(),
            failing: AtomicBool::new(false),
        }
    }
}

impl CatalogStore for FlakyStore {
    fn append(&self, record: &NewRecord) -> Result<RecordId> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ArquivistaError::InvalidData("catalog offline".to_string()));
        }
        self.inner.append(record)
    }

    fn page(&self, owner: &Owner, after: Option<RecordId>, limit: usize) -> Result<Vec<ArchiveRecord>> {
        self.inner.page(owner, after, limit)
    }

    fn category_counts(&self, owner: &Owner) -> Result<Vec<(String, i64)>> {
        self.inner.category_counts(owner)
    }
}

/// Catalog that fails after something reoccupies the source path
struct RacingStore {
    inner: Database,
    source: PathBuf,
}

impl CatalogStore for RacingStore {
    fn append(&self, _record: &NewRecord) -> Result<RecordId> {
        fs::write(&self.source, "newcomer")?;
        Err(ArquivistaError::InvalidData("catalog offline".to_string()))
    }

    fn page(&self, owner: &Owner, after: Option<RecordId>, limit: usize) -> Result<Vec<ArchiveRecord>> {
        self.inner.page(owner, after, limit)
    }

    fn category_counts(&self, owner: &Owner) -> Result<Vec<(String, i64)>> {
        self.inner.category_counts(owner)
    }
}

#[test]
fn test_every_moved_file_has_exactly_one_record() {
    let tmp = TempDir::new().unwrap();
    let inbox = tmp.path().join("inbox");
    for name in ["a.png", "b.PDF", "c.docx", "d.xyz", "e", "f.tar.gz"] {
        write(&inbox, name, name);
    }
    fs::create_dir_all(inbox.join("nested")).unwrap();

    let organizer = organizer_in(&tmp);
    let ana = owner("ana");
    let report = organizer
        .organize(&ana, &inbox, CollisionPolicy::Reject)
        .unwrap();

    assert_eq!(report.moved(), 6);
    assert_eq!(report.entries.len(), 6, "subdirectories produce no outcome");

    let records = organizer.history(&ana).collect_all().unwrap();
    assert_eq!(records.len(), 6);

    let on_disk: HashSet<PathBuf> = records.iter().map(|r| r.file_path()).collect();
    assert_eq!(on_disk.len(), 6);
    for path in &on_disk {
        assert!(path.is_file(), "{:?} should exist", path);
    }

    let moved_ids: HashSet<RecordId> = report
        .entries
        .iter()
        .filter_map(|e| match e {
            FileOutcome::Moved { record_id, .. } => Some(*record_id),
            _ => None,
        })
        .collect();
    let history_ids: HashSet<RecordId> = records.iter().map(|r| r.id).collect();
    assert_eq!(moved_ids, history_ids);

    assert!(tmp.path().join("storage/ana/documents/pdf/b.PDF").is_file());
    assert!(tmp.path().join("storage/ana/other/d.xyz").is_file());
    assert!(tmp.path().join("storage/ana/other/e").is_file());
    assert!(tmp.path().join("storage/ana/other/f.tar.gz").is_file());
    assert!(inbox.join("nested").is_dir());
    assert!(organizer.audit(&ana).unwrap().is_consistent());
}

#[test]
fn test_second_run_over_emptied_source_is_empty() {
    let tmp = TempDir::new().unwrap();
    let inbox = tmp.path().join("inbox");
    write(&inbox, "notes.txt", "hello");

    let organizer = organizer_in(&tmp);
    let ana = owner("ana");
    let first = organizer.organize(&ana, &inbox, CollisionPolicy::Reject).unwrap();
    let second = organizer.organize(&ana, &inbox, CollisionPolicy::Reject).unwrap();

    assert_eq!(first.moved(), 1);
    assert!(second.is_empty());
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(organizer.history(&ana).collect_all().unwrap().len(), 1);
}

#[test]
fn test_catalog_failure_puts_file_back() {
    let tmp = TempDir::new().unwrap();
    let inbox = tmp.path().join("inbox");
    let source = write(&inbox, "photo.jpg", "pixels");

    let store = FlakyStore::new();
    store.failing.store(true, Ordering::SeqCst);
    let organizer = Organizer::new(store, CategoryRules::default(), tmp.path().join("storage"));
    let ana = owner("ana");

    let report = organizer.organize(&ana, &inbox, CollisionPolicy::Reject).unwrap();
    match &report.entries[..] {
        [FileOutcome::Failed {
            error: FileFailure::Persistence { rollback, .. },
            ..
        }] => assert_eq!(rollback, &Rollback::Restored),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(report.needs_reconciliation().is_empty());
    assert_eq!(fs::read_to_string(&source).unwrap(), "pixels");
    assert!(!tmp.path().join("storage/ana/images/jpg/photo.jpg").exists());
    assert!(organizer.history(&ana).collect_all().unwrap().is_empty());

    // Catalog back online: the same file goes through
    organizer.store().failing.store(false, Ordering::SeqCst);
    let retry = organizer.organize(&ana, &inbox, CollisionPolicy::Reject).unwrap();
    assert_eq!(retry.moved(), 1);
    assert!(!source.exists());
}

#[test]
fn test_catalog_failure_with_reoccupied_source_needs_reconciliation() {
    let tmp = TempDir::new().unwrap();
    let inbox = tmp.path().join("inbox");
    let source = write(&inbox, "report.pdf", "original");

    let store = RacingStore {
        inner: Database::in_memory().unwrap(),
        source: source.clone(),
    };
    let organizer = Organizer::new(store, CategoryRules::default(), tmp.path().join("storage"));
    let ana = owner("ana");

    let report = organizer.organize(&ana, &inbox, CollisionPolicy::Reject).unwrap();
    assert_eq!(report.needs_reconciliation().len(), 1);
    match &report.entries[..] {
        [FileOutcome::Failed {
            name,
            error:
                FileFailure::Persistence {
                    message,
                    rollback: Rollback::NeedsReconciliation { message: rollback_message },
                },
        }] => {
            assert_eq!(name, "report.pdf");
            assert!(message.contains("catalog offline"), "{}", message);
            assert!(rollback_message.contains("recreated"), "{}", rollback_message);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // Neither copy is lost or clobbered
    let stored = tmp.path().join("storage/ana/documents/pdf/report.pdf");
    assert_eq!(fs::read_to_string(&stored).unwrap(), "original");
    assert_eq!(fs::read_to_string(&source).unwrap(), "newcomer");
    assert!(organizer.history(&ana).collect_all().unwrap().is_empty());

    let audit = organizer.audit(&ana).unwrap();
    assert_eq!(audit.untracked, vec![stored]);
}

#[test]
fn test_overwrite_restores_previous_file_when_catalog_fails() {
    let tmp = TempDir::new().unwrap();
    let inbox = tmp.path().join("inbox");
    let organizer = Organizer::new(
        FlakyStore::new(),
        CategoryRules::default(),
        tmp.path().join("storage"),
    );
    let ana = owner("ana");

    write(&inbox, "song.mp3", "first take");
    organizer.organize(&ana, &inbox, CollisionPolicy::Reject).unwrap();

    let source = write(&inbox, "song.mp3", "second take");
    organizer.store().failing.store(true, Ordering::SeqCst);
    let report = organizer.organize(&ana, &inbox, CollisionPolicy::Overwrite).unwrap();
    assert_eq!(report.failed(), 1);
    assert!(report.needs_reconciliation().is_empty());

    let stored = tmp.path().join("storage/ana/multimedia/audio/song.mp3");
    assert_eq!(fs::read_to_string(&stored).unwrap(), "first take");
    assert_eq!(fs::read_to_string(&source).unwrap(), "second take");

    let leftovers: Vec<_> = fs::read_dir(stored.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1, "backup must not linger: {:?}", leftovers);
}

#[test]
fn test_concurrent_same_name_reject_keeps_one_winner() {
    let tmp = TempDir::new().unwrap();
    let organizer = Arc::new(organizer_in(&tmp));
    let ana = owner("ana");
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let inbox = tmp.path().join(format!("inbox{}", i));
            write(&inbox, "cat.png", &format!("cat {}", i));
            let organizer = Arc::clone(&organizer);
            let barrier = Arc::clone(&barrier);
            let ana = ana.clone();
            thread::spawn(move || {
                barrier.wait();
                organizer.organize(&ana, &inbox, CollisionPolicy::Reject).unwrap()
            })
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let moved: usize = reports.iter().map(|r| r.moved()).sum();
    let rejected = reports
        .iter()
        .flat_map(|r| &r.entries)
        .filter(|e| {
            matches!(
                e,
                FileOutcome::Skipped {
                    reason: SkipReason::DestinationExists,
                    ..
                }
            )
        })
        .count();
    assert_eq!(moved, 1);
    assert_eq!(rejected, 1);
    assert_eq!(organizer.history(&ana).collect_all().unwrap().len(), 1);
}

#[test]
fn test_concurrent_rename_never_clobbers() {
    let tmp = TempDir::new().unwrap();
    let organizer = Arc::new(organizer_in(&tmp));
    let ana = owner("ana");

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let inbox = tmp.path().join(format!("inbox{}", i));
            write(&inbox, "scan.pdf", &format!("scan {}", i));
            let organizer = Arc::clone(&organizer);
            let ana = ana.clone();
            thread::spawn(move || organizer.organize(&ana, &inbox, CollisionPolicy::Rename).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().moved(), 1);
    }

    let records = organizer.history(&ana).collect_all().unwrap();
    let names: HashSet<_> = records.iter().map(|r| r.name.clone()).collect();
    assert_eq!(names.len(), 4);

    let contents: HashSet<_> = records
        .iter()
        .map(|r| fs::read_to_string(r.file_path()).unwrap())
        .collect();
    assert_eq!(contents.len(), 4);
}

#[test]
fn test_concurrent_owners_see_only_their_history() {
    let tmp = TempDir::new().unwrap();
    let organizer = Arc::new(organizer_in(&tmp));

    let handles: Vec<_> = ["ana", "bia", "caio"]
        .into_iter()
        .map(|name| {
            let inbox = tmp.path().join(format!("inbox-{}", name));
            for i in 0..5 {
                write(&inbox, &format!("{}-{}.txt", name, i), name);
            }
            let organizer = Arc::clone(&organizer);
            thread::spawn(move || {
                organizer
                    .organize(&owner(name), &inbox, CollisionPolicy::Reject)
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().moved(), 5);
    }

    for name in ["ana", "bia", "caio"] {
        let records = organizer.history(&owner(name)).collect_all().unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.owner.as_str() == name));
        assert!(records.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(
            organizer.store().category_counts(&owner(name)).unwrap(),
            vec![("documents/text".to_string(), 5)]
        );
    }
}

#[test]
fn test_file_backed_catalog_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let inbox = tmp.path().join("inbox");
    let db_path = tmp.path().join("arquivista.db");
    write(&inbox, "deck.pptx", "slides");

    {
        let organizer = Organizer::new(
            Database::open(&db_path).unwrap(),
            CategoryRules::default(),
            tmp.path().join("storage"),
        );
        organizer
            .organize(&owner("ana"), &inbox, CollisionPolicy::Reject)
            .unwrap();
    }

    let reopened = Organizer::new(
        Database::open(&db_path).unwrap(),
        CategoryRules::default(),
        tmp.path().join("storage"),
    );
    let records = reopened.history(&owner("ana")).collect_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, "documents/powerpoint");
}
