//! Applying a classified plan to the target store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::report::{OperationKind, Outcome, ReportBuilder, ReportEntry, SyncReport};
use super::{ConflictPolicy, IdentityResolver, Operation};
use crate::error::{Result, SyncError};
use crate::store::StoreAdapter;

/// Answer of a confirmer for one pending mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Apply the operation
    Apply,
    /// Leave it out; recorded as skipped
    Skip,
    /// Stop the run; this and every remaining mutation are skipped
    Quit,
}

/// External yes/no capability consulted before gated mutations
pub trait Confirmer {
    fn confirm(&mut self, operation: &Operation) -> Decision;
}

impl<F> Confirmer for F
where
    F: FnMut(&Operation) -> Decision,
{
    fn confirm(&mut self, operation: &Operation) -> Decision {
        self(operation)
    }
}

/// Confirmer that approves everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysApply;

impl Confirmer for AlwaysApply {
    fn confirm(&mut self, _operation: &Operation) -> Decision {
        Decision::Apply
    }
}

/// Which mutating kinds wait for the confirmer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPolicy {
    pub creates: bool,
    pub updates: bool,
    pub deletes: bool,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self::deletes_only()
    }
}

impl ConfirmPolicy {
    pub fn none() -> Self {
        Self {
            creates: false,
            updates: false,
            deletes: false,
        }
    }

    pub fn all() -> Self {
        Self {
            creates: true,
            updates: true,
            deletes: true,
        }
    }

    pub fn deletes_only() -> Self {
        Self {
            deletes: true,
            ..Self::none()
        }
    }

    pub fn requires(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Create => self.creates,
            OperationKind::Update => self.updates,
            OperationKind::Delete => self.deletes,
            OperationKind::Unchanged | OperationKind::Conflict => false,
        }
    }
}

/// Executor options
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Report intended actions without calling the target store
    pub dry_run: bool,
    pub confirm: ConfirmPolicy,
}

/// Shared flag that stops a run from issuing further operations
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Applies non-conflicting operations one at a time, isolating failures
pub struct SyncPlanExecutor {
    options: ExecuteOptions,
    resolver: IdentityResolver,
    policy: ConflictPolicy,
    cancel: CancelFlag,
}

impl SyncPlanExecutor {
    pub fn new(options: ExecuteOptions, resolver: IdentityResolver) -> Self {
        Self {
            options,
            resolver,
            policy: ConflictPolicy::new(),
            cancel: CancelFlag::new(),
        }
    }

    /// Share a cancel flag with the caller (e.g. a Ctrl-C handler)
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Execute `operations` against `target` and return the finished report
    pub fn execute(
        &self,
        operations: Vec<Operation>,
        target: &dyn StoreAdapter,
        confirmer: &mut dyn Confirmer,
    ) -> SyncReport {
        let mut report = ReportBuilder::new("", target.name(), self.options.dry_run);
        self.execute_into(operations, target, confirmer, &mut report);
        report.finish()
    }

    /// Execute `operations`, appending one entry per operation to `report`.
    ///
    /// At most one mutating call is outstanding at any time. A failed call is
    /// recorded and the remaining operations still run; nothing is retried.
    pub fn execute_into(
        &self,
        operations: Vec<Operation>,
        target: &dyn StoreAdapter,
        confirmer: &mut dyn Confirmer,
        report: &mut ReportBuilder,
    ) {
        for operation in operations {
            let key = self.resolver.render(operation.key());
            let kind = operation.kind();
            let changed = operation.changed().to_vec();

            let (outcome, detail) = match &operation {
                Operation::Unchanged { .. } => (Outcome::Skipped, None),
                Operation::Conflict {
                    source: from,
                    target: to,
                    ..
                } => {
                    tracing::warn!("Conflict on {}: left for manual resolution", key);
                    (Outcome::Skipped, Some(self.policy.describe(from, to)))
                }
                _ => self.execute_one(&operation, &key, target, confirmer),
            };

            report.record(ReportEntry {
                key,
                kind,
                outcome,
                changed,
                detail,
            });
        }

        if self.cancel.is_cancelled() {
            report.mark_cancelled();
        }
    }

    fn execute_one(
        &self,
        operation: &Operation,
        key: &str,
        target: &dyn StoreAdapter,
        confirmer: &mut dyn Confirmer,
    ) -> (Outcome, Option<String>) {
        let kind = operation.kind();

        if self.cancel.is_cancelled() {
            return (Outcome::Skipped, Some("cancelled".to_string()));
        }

        if self.options.dry_run {
            tracing::info!("[dry run] would {} {}", kind, key);
            return (Outcome::Applied, Some("dry run".to_string()));
        }

        if self.options.confirm.requires(kind) {
            match confirmer.confirm(operation) {
                Decision::Apply => {}
                Decision::Skip => {
                    tracing::info!("Skipped {} of {}", kind, key);
                    return (Outcome::Skipped, Some("declined".to_string()));
                }
                Decision::Quit => {
                    tracing::warn!("Sync stopped before {} of {}", kind, key);
                    self.cancel.cancel();
                    return (Outcome::Skipped, Some("cancelled".to_string()));
                }
            }
        }

        match apply(operation, target) {
            Ok(()) => {
                tracing::info!("{} {}: {}", target.name(), kind, key);
                (Outcome::Applied, None)
            }
            Err(e) => {
                tracing::error!("{} {} failed for {}: {}", target.name(), kind, key, e);
                (Outcome::Failed, Some(e.to_string()))
            }
        }
    }
}

fn apply(operation: &Operation, store: &dyn StoreAdapter) -> Result<()> {
    match operation {
        Operation::Create { source, .. } => store.create(source),
        Operation::Update { source, target, .. } => store.update(target, source),
        Operation::Delete { target, .. } => store.delete(target),
        Operation::Unchanged { .. } | Operation::Conflict { .. } => Err(SyncError::Unsupported(
            format!("{} is not applied to a store", operation.kind()),
        )),
    }
}
