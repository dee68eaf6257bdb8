//! One-way reconciliation of two credential stores
//!
//! A run loads both stores, matches records by identity key, classifies the
//! differences and applies the non-conflicting ones to the target. The
//! source store is never modified and no state survives between runs.
//!
//! ```text
//! source ─┐                                             ┌─> SyncReport
//!         ├─ Dataset ─> ReconciliationEngine ─> ConflictPolicy ─> SyncPlanExecutor
//! target ─┘                                             └─> target mutations
//! ```

mod conflict;
mod dataset;
mod engine;
mod executor;
mod identity;
mod report;

pub use conflict::ConflictPolicy;
pub use dataset::Dataset;
pub use engine::ReconciliationEngine;
pub use executor::{
    AlwaysApply, CancelFlag, ConfirmPolicy, Confirmer, Decision, ExecuteOptions,
    SyncPlanExecutor,
};
pub use identity::{
    IdentityKey, IdentityResolver, KeyValue, DEFAULT_IDENTITY_FIELDS, DEFAULT_KEY_SEPARATOR,
};
pub use report::{
    OperationKind, Outcome, RejectedRecord, ReportBuilder, ReportCounts, ReportEntry, SyncReport,
};

use crate::error::{Result, SyncError};
use crate::store::StoreAdapter;
use crate::types::{CanonicalRecord, RecordField, SyncScope};

/// A classified difference for one identity key.
///
/// Produced for a single run and consumed right away; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Present only in the source
    Create {
        key: IdentityKey,
        source: CanonicalRecord,
    },
    /// Present in both with differing content; applied to the target
    Update {
        key: IdentityKey,
        source: CanonicalRecord,
        target: CanonicalRecord,
        changed: Vec<RecordField>,
    },
    /// Present only in the target
    Delete {
        key: IdentityKey,
        target: CanonicalRecord,
    },
    /// Present in both with equal content
    Unchanged { key: IdentityKey },
    /// Differing pair where the target holds the newer edit; never applied
    Conflict {
        key: IdentityKey,
        source: CanonicalRecord,
        target: CanonicalRecord,
        changed: Vec<RecordField>,
    },
}

impl Operation {
    pub fn key(&self) -> &IdentityKey {
        match self {
            Operation::Create { key, .. }
            | Operation::Update { key, .. }
            | Operation::Delete { key, .. }
            | Operation::Unchanged { key }
            | Operation::Conflict { key, .. } => key,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Create { .. } => OperationKind::Create,
            Operation::Update { .. } => OperationKind::Update,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Unchanged { .. } => OperationKind::Unchanged,
            Operation::Conflict { .. } => OperationKind::Conflict,
        }
    }

    /// Differing fields for updates and conflicts, empty otherwise
    pub fn changed(&self) -> &[RecordField] {
        match self {
            Operation::Update { changed, .. } | Operation::Conflict { changed, .. } => changed,
            _ => &[],
        }
    }

    /// Whether applying this operation calls the target store
    pub fn is_mutating(&self) -> bool {
        self.kind().is_mutating()
    }

    /// The record the operation is about, preferring the source side
    pub fn record(&self) -> Option<&CanonicalRecord> {
        match self {
            Operation::Create { source, .. }
            | Operation::Update { source, .. }
            | Operation::Conflict { source, .. } => Some(source),
            Operation::Delete { target, .. } => Some(target),
            Operation::Unchanged { .. } => None,
        }
    }
}

/// Everything a run needs besides the two stores
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Identity fields and key separator
    pub resolver: IdentityResolver,
    /// Which records take part on both sides
    pub scope: SyncScope,
    /// Classify and report without touching the target
    pub dry_run: bool,
    /// Which mutating kinds wait for the confirmer
    pub confirm: ConfirmPolicy,
}

impl SyncConfig {
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            dry_run: self.dry_run,
            confirm: self.confirm,
        }
    }
}

/// Load both stores, classify and apply.
///
/// Fatal errors (bad configuration, unreadable store, ambiguous identity)
/// are returned before any mutation. Per-record write failures end up in the
/// report instead.
pub fn run(
    source: &dyn StoreAdapter,
    target: &dyn StoreAdapter,
    config: &SyncConfig,
    confirmer: &mut dyn Confirmer,
    cancel: &CancelFlag,
) -> Result<SyncReport> {
    tracing::info!(
        "Sync {} -> {} (identity: {}, dry run: {})",
        source.name(),
        target.name(),
        config
            .resolver
            .fields()
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(","),
        config.dry_run
    );

    let mut report = ReportBuilder::new(source.name(), target.name(), config.dry_run);

    // The two enumerations are independent; join before classifying.
    let (from, to) = std::thread::scope(|scope| {
        let from = scope.spawn(|| Dataset::load(source, config.scope, &config.resolver));
        let to = scope.spawn(|| Dataset::load(target, config.scope, &config.resolver));
        (
            from.join()
                .unwrap_or_else(|_| Err(SyncError::read(source.name(), "enumeration panicked"))),
            to.join()
                .unwrap_or_else(|_| Err(SyncError::read(target.name(), "enumeration panicked"))),
        )
    });
    let from = from?;
    let to = to?;

    report.reject_all(from.rejected);
    report.reject_all(to.rejected);

    let engine = ReconciliationEngine::new(config.resolver.clone())
        .with_store_names(source.name(), target.name());
    let operations = ConflictPolicy::new().apply(engine.reconcile(&from.records, &to.records)?);

    let executor = SyncPlanExecutor::new(config.execute_options(), config.resolver.clone())
        .with_cancel_flag(cancel.clone());
    executor.execute_into(operations, target, confirmer, &mut report);

    let report = report.finish();
    let counts = report.counts();
    tracing::info!(
        "Sync finished: {} created, {} updated, {} deleted, {} conflicts, {} unchanged, {} failed",
        counts.create,
        counts.update,
        counts.delete,
        counts.conflict,
        counts.unchanged,
        counts.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_operation_accessors() {
        let resolver = IdentityResolver::default();
        let rec = CanonicalRecord::new(["Old"], "Unused", "dave", "pw");
        let op = Operation::Delete {
            key: resolver.key(&rec),
            target: rec.clone(),
        };
        assert_eq!(op.kind(), OperationKind::Delete);
        assert!(op.is_mutating());
        assert!(op.changed().is_empty());
        assert_eq!(op.record(), Some(&rec));
    }

    #[test]
    fn test_run_fails_fast_on_ambiguous_target() {
        let source = MemoryStore::new("from")
            .with_records([CanonicalRecord::new(["Web"], "Bank", "alice", "pw")]);
        let target = MemoryStore::new("to").with_records([
            CanonicalRecord::new(["Web"], "Mail", "bob", "a"),
            CanonicalRecord::new(["Web"], "Mail", "rob", "b"),
        ]);

        let err = run(
            &source,
            &target,
            &SyncConfig::default(),
            &mut AlwaysApply,
            &CancelFlag::new(),
        )
        .unwrap_err();

        assert!(matches!(err, SyncError::AmbiguousIdentity { ref store, .. } if store == "to"));
        assert!(target.mutations().is_empty());
    }
}
