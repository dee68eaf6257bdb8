//! End-to-end sync runs against in-memory stores
//!
//! Run with: cargo test --test sync_scenarios

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use pwsync::error::{Result, SyncError};
use pwsync::store::{MemoryStore, Mutation, StoreAdapter};
use pwsync::sync::{
    run, AlwaysApply, CancelFlag, ConfirmPolicy, Decision, IdentityKey, IdentityResolver,
    Operation, OperationKind, Outcome, SyncConfig, SyncReport,
};
use pwsync::types::{CanonicalRecord, RecordField, SyncScope};

fn sync(source: &dyn StoreAdapter, target: &dyn StoreAdapter, config: &SyncConfig) -> SyncReport {
    run(source, target, config, &mut AlwaysApply, &CancelFlag::new()).unwrap()
}

fn key(record: &CanonicalRecord) -> IdentityKey {
    IdentityResolver::default().key(record)
}

/// Wraps a store and fails every mutation touching one title
struct FailingStore {
    inner: MemoryStore,
    poisoned: String,
}

impl FailingStore {
    fn check(&self, title: &str) -> Result<()> {
        if title == self.poisoned {
            Err(SyncError::StoreWrite(format!("{} is read-only", title)))
        } else {
            Ok(())
        }
    }
}

impl StoreAdapter for FailingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_all(&self) -> Result<Vec<CanonicalRecord>> {
        self.inner.list_all()
    }

    fn create(&self, record: &CanonicalRecord) -> Result<()> {
        self.check(&record.title)?;
        self.inner.create(record)
    }

    fn update(&self, current: &CanonicalRecord, record: &CanonicalRecord) -> Result<()> {
        self.check(&record.title)?;
        self.inner.update(current, record)
    }

    fn delete(&self, current: &CanonicalRecord) -> Result<()> {
        self.check(&current.title)?;
        self.inner.delete(current)
    }
}

/// Store whose enumeration always fails
struct UnreadableStore;

impl StoreAdapter for UnreadableStore {
    fn name(&self) -> &str {
        "offline"
    }

    fn list_all(&self) -> Result<Vec<CanonicalRecord>> {
        Err(SyncError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no route to vault",
        )))
    }

    fn create(&self, _record: &CanonicalRecord) -> Result<()> {
        unreachable!("create on an unreadable store")
    }

    fn update(&self, _current: &CanonicalRecord, _record: &CanonicalRecord) -> Result<()> {
        unreachable!("update on an unreadable store")
    }

    fn delete(&self, _current: &CanonicalRecord) -> Result<()> {
        unreachable!("delete on an unreadable store")
    }
}

#[test]
fn new_source_record_is_created() {
    let bank = CanonicalRecord::new(["Web"], "Bank", "alice", "pw");
    let source = MemoryStore::new("from").with_records([bank.clone()]);
    let target = MemoryStore::new("to");

    let report = sync(&source, &target, &SyncConfig::default());

    assert_eq!(report.counts().create, 1);
    assert_eq!(report.counts().applied, 1);
    assert_eq!(target.mutations(), vec![Mutation::Create(key(&bank))]);
    assert!(target.records()[0].same_content(&bank));
    assert!(source.mutations().is_empty());
}

#[test]
fn older_target_is_updated() {
    let t = Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap();
    let shop = CanonicalRecord::new(["Web"], "Shop", "bob", "pw").modified_at(t);
    let source = MemoryStore::new("from").with_records([shop.clone()]);
    let target = MemoryStore::new("to").with_records([
        CanonicalRecord::new(["Web"], "Shop", "rob", "pw").modified_at(t - Duration::days(1))
    ]);

    let report = sync(&source, &target, &SyncConfig::default());

    let entry = &report.entries()[0];
    assert_eq!(entry.kind, OperationKind::Update);
    assert_eq!(entry.outcome, Outcome::Applied);
    assert_eq!(entry.changed, vec![RecordField::Username]);
    assert_eq!(target.mutations(), vec![Mutation::Update(key(&shop))]);
    assert_eq!(target.records()[0].username, "bob");
}

#[test]
fn newer_target_is_a_conflict() {
    let t = Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap();
    let source = MemoryStore::new("from")
        .with_records([CanonicalRecord::new(["Web"], "Shop", "bob", "pw").modified_at(t)]);
    let target = MemoryStore::new("to").with_records([
        CanonicalRecord::new(["Web"], "Shop", "rob", "pw").modified_at(t + Duration::days(1))
    ]);

    let report = sync(&source, &target, &SyncConfig::default());

    assert_eq!(report.counts().conflict, 1);
    assert_eq!(report.entries()[0].outcome, Outcome::Skipped);
    assert!(report.entries()[0].detail.is_some());
    assert!(report.has_conflicts());
    assert!(!report.has_failures());
    assert!(target.mutations().is_empty());
}

#[test]
fn identical_records_are_unchanged() {
    let mail = CanonicalRecord::new(["Web"], "Mail", "carol", "pw").with_url("https://mail");
    let source = MemoryStore::new("from").with_records([mail.clone().modified_at(Utc::now())]);
    let target = MemoryStore::new("to").with_records([mail]);

    let report = sync(&source, &target, &SyncConfig::default());

    assert_eq!(report.counts().unchanged, 1);
    assert!(target.mutations().is_empty());
}

#[test]
fn declined_delete_is_skipped() {
    let source = MemoryStore::new("from");
    let target = MemoryStore::new("to")
        .with_records([CanonicalRecord::new(["Old"], "Unused", "dave", "pw")]);
    let mut no = |op: &Operation| {
        assert_eq!(op.kind(), OperationKind::Delete);
        Decision::Skip
    };

    let report = run(
        &source,
        &target,
        &SyncConfig::default(),
        &mut no,
        &CancelFlag::new(),
    )
    .unwrap();

    assert_eq!(report.counts().delete, 1);
    assert_eq!(report.counts().skipped, 1);
    assert_eq!(report.counts().failed, 0);
    assert!(target.mutations().is_empty());
    assert_eq!(target.len(), 1);
}

#[test]
fn dry_run_reports_the_same_plan_without_mutations() {
    let t = Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap();
    let build = || {
        (
            MemoryStore::new("from").with_records([
                CanonicalRecord::new(["Web"], "Bank", "alice", "pw"),
                CanonicalRecord::new(["Web"], "Shop", "bob", "pw").modified_at(t),
            ]),
            MemoryStore::new("to").with_records([
                CanonicalRecord::new(["Web"], "Shop", "rob", "pw").modified_at(t),
                CanonicalRecord::new(["Old"], "Unused", "dave", "pw"),
            ]),
        )
    };

    let (source, target) = build();
    let dry = sync(
        &source,
        &target,
        &SyncConfig {
            dry_run: true,
            ..Default::default()
        },
    );
    assert!(target.mutations().is_empty());

    let (source, target) = build();
    let wet = sync(&source, &target, &SyncConfig::default());
    assert_eq!(target.mutations().len(), 3);

    let kinds = |r: &SyncReport| {
        r.entries()
            .iter()
            .map(|e| (e.key.clone(), e.kind))
            .collect::<Vec<_>>()
    };
    assert_eq!(kinds(&dry), kinds(&wet));
    assert_eq!(dry.counts(), wet.counts());
    assert!(dry.dry_run());
}

#[test]
fn one_failure_does_not_stop_the_run() {
    let source = MemoryStore::new("from").with_records([
        CanonicalRecord::new(["Web"], "A", "u", "pw"),
        CanonicalRecord::new(["Web"], "B", "u", "pw"),
        CanonicalRecord::new(["Web"], "C", "u", "pw"),
    ]);
    let target = FailingStore {
        inner: MemoryStore::new("to").with_records([CanonicalRecord::new(["Old"], "D", "u", "pw")]),
        poisoned: "B".to_string(),
    };

    let report = sync(&source, &target, &SyncConfig::default());

    assert_eq!(report.entries().len(), 4);
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].key, "Web:B");
    assert!(failed[0].detail.as_deref().unwrap_or("").contains("read-only"));
    assert_eq!(report.counts().applied, 3);
    assert_eq!(target.inner.mutations().len(), 3);
}

#[test]
fn unreadable_store_aborts_before_mutation() {
    let target = MemoryStore::new("to")
        .with_records([CanonicalRecord::new(["Old"], "Unused", "dave", "pw")]);

    let err = run(
        &UnreadableStore,
        &target,
        &SyncConfig::default(),
        &mut AlwaysApply,
        &CancelFlag::new(),
    )
    .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, SyncError::StoreRead { ref store, .. } if store == "offline"));
    assert!(target.mutations().is_empty());
}

#[test]
fn unflagged_records_stay_out_of_the_run() {
    let source = MemoryStore::new("from").with_records([
        CanonicalRecord::new(["Web"], "Bank", "alice", "pw"),
        CanonicalRecord::new(["Web"], "Private", "alice", "pw").with_sync(false),
    ]);
    let target = MemoryStore::new("to")
        .with_records([CanonicalRecord::new(["Old"], "Manual", "dave", "pw").with_sync(false)]);

    let flagged = sync(&source, &target, &SyncConfig::default());
    assert_eq!(flagged.entries().len(), 1);
    assert_eq!(flagged.entries()[0].key, "Web:Bank");

    let target = MemoryStore::new("to")
        .with_records([CanonicalRecord::new(["Old"], "Manual", "dave", "pw").with_sync(false)]);
    let all = sync(
        &source,
        &target,
        &SyncConfig {
            scope: SyncScope::All,
            ..Default::default()
        },
    );
    assert_eq!(all.counts().create, 2);
    assert_eq!(all.counts().delete, 1);
}

fn manual_bank() -> CanonicalRecord {
    CanonicalRecord::new(["Web"], "Bank", "manual", "keep-me").with_sync(false)
}

fn usernames(store: &MemoryStore) -> Vec<(String, String, bool)> {
    let mut rows: Vec<_> = store
        .records()
        .into_iter()
        .map(|r| (r.username, r.secret, r.sync_enabled))
        .collect();
    rows.sort();
    rows
}

#[test]
fn delete_never_reaches_an_unflagged_twin() {
    let source = MemoryStore::new("from");
    let target = MemoryStore::new("to").with_records([
        manual_bank(),
        CanonicalRecord::new(["Web"], "Bank", "synced", "pw"),
    ]);

    let report = sync(&source, &target, &SyncConfig::default());

    assert_eq!(report.counts().delete, 1);
    assert_eq!(report.counts().applied, 1);
    assert_eq!(
        usernames(&target),
        vec![("manual".to_string(), "keep-me".to_string(), false)]
    );
}

#[test]
fn update_never_reaches_an_unflagged_twin() {
    let source = MemoryStore::new("from")
        .with_records([CanonicalRecord::new(["Web"], "Bank", "alice", "new")]);
    let target = MemoryStore::new("to").with_records([
        manual_bank(),
        CanonicalRecord::new(["Web"], "Bank", "alice", "old"),
    ]);

    let report = sync(&source, &target, &SyncConfig::default());

    assert_eq!(report.counts().update, 1);
    assert!(!report.has_failures());
    assert_eq!(
        usernames(&target),
        vec![
            ("alice".to_string(), "new".to_string(), true),
            ("manual".to_string(), "keep-me".to_string(), false),
        ]
    );
}

#[test]
fn create_beside_an_unflagged_twin() {
    let bank = CanonicalRecord::new(["Web"], "Bank", "alice", "pw");
    let source = MemoryStore::new("from").with_records([bank.clone()]);
    let target = MemoryStore::new("to").with_records([manual_bank()]);

    let report = sync(&source, &target, &SyncConfig::default());

    assert_eq!(report.counts().create, 1);
    assert!(!report.has_failures());
    assert_eq!(target.len(), 2);
    assert!(target.records().contains(&manual_bank()));

    let again = sync(&source, &target, &SyncConfig::default());
    assert_eq!(again.counts().unchanged, 1);
}

#[test]
fn invalid_records_are_rejected_not_fatal() {
    let source = MemoryStore::new("from").with_records([
        CanonicalRecord::new(["Web"], "Bank", "alice", "pw"),
        CanonicalRecord::new(["Web"], "Anonymous", "", "pw"),
    ]);
    let target = MemoryStore::new("to");

    let report = sync(&source, &target, &SyncConfig::default());

    assert_eq!(report.counts().create, 1);
    assert_eq!(report.rejected().len(), 1);
    assert_eq!(report.rejected()[0].store, "from");
}

#[test]
fn quit_stops_remaining_mutations() {
    let source = MemoryStore::new("from").with_records([
        CanonicalRecord::new(["Web"], "A", "u", "pw"),
        CanonicalRecord::new(["Web"], "B", "u", "pw"),
    ]);
    let target = MemoryStore::new("to");
    let mut asked = 0;
    let mut answer = |_: &Operation| {
        asked += 1;
        if asked == 1 {
            Decision::Apply
        } else {
            Decision::Quit
        }
    };
    let config = SyncConfig {
        confirm: ConfirmPolicy::all(),
        ..Default::default()
    };

    let report = run(&source, &target, &config, &mut answer, &CancelFlag::new()).unwrap();

    assert!(report.cancelled());
    assert_eq!(report.counts().applied, 1);
    assert_eq!(report.counts().skipped, 1);
    assert_eq!(target.len(), 1);
}

#[test]
fn cancelled_run_issues_no_mutations() {
    let source = MemoryStore::new("from")
        .with_records([CanonicalRecord::new(["Web"], "Bank", "alice", "pw")]);
    let target = MemoryStore::new("to");
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = run(
        &source,
        &target,
        &SyncConfig::default(),
        &mut AlwaysApply,
        &cancel,
    )
    .unwrap();

    assert!(report.cancelled());
    assert_eq!(report.entries()[0].detail.as_deref(), Some("cancelled"));
    assert!(target.mutations().is_empty());
}

#[test]
fn second_run_after_sync_is_a_no_op() {
    let source = MemoryStore::new("from").with_records([
        CanonicalRecord::new(["Web"], "Bank", "alice", "pw"),
        CanonicalRecord::new(["Web", "Mail"], "Inbox", "carol", "pw").with_notes("imap"),
    ]);
    let target = MemoryStore::new("to");

    sync(&source, &target, &SyncConfig::default());
    let again = sync(&source, &target, &SyncConfig::default());

    assert_eq!(again.counts().unchanged, 2);
    assert_eq!(target.mutations().len(), 2);
}
