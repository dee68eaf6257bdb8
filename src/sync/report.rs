//! Outcome of a sync run

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::RecordField;

/// Kind of a classified operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Unchanged,
    Conflict,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Unchanged => "unchanged",
            OperationKind::Conflict => "conflict",
        }
    }

    /// Whether the kind results in a call to the target store
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OperationKind::Create | OperationKind::Update | OperationKind::Delete
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Applied to the target (or would have been, in a dry run)
    Applied,
    /// Not applied: unchanged, conflicting, declined or cancelled
    Skipped,
    /// The target store returned an error
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    /// Rendered identity key
    pub key: String,
    pub kind: OperationKind,
    pub outcome: Outcome,
    /// Differing fields for updates and conflicts
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<RecordField>,
    /// Error or reason supplied by the adapter or the executor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A record turned away at the adapter boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub store: String,
    pub label: String,
    pub reason: String,
}

/// Aggregate counts per operation kind and per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub unchanged: usize,
    pub conflict: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ReportCounts {
    pub fn kind(&self, kind: OperationKind) -> usize {
        match kind {
            OperationKind::Create => self.create,
            OperationKind::Update => self.update,
            OperationKind::Delete => self.delete,
            OperationKind::Unchanged => self.unchanged,
            OperationKind::Conflict => self.conflict,
        }
    }

    pub fn outcome(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Applied => self.applied,
            Outcome::Skipped => self.skipped,
            Outcome::Failed => self.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.skipped + self.failed
    }
}

/// Accumulates entries while a run executes
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    source: String,
    target: String,
    dry_run: bool,
    cancelled: bool,
    started_at: DateTime<Utc>,
    entries: Vec<ReportEntry>,
    rejected: Vec<RejectedRecord>,
}

impl ReportBuilder {
    pub fn new(source: impl Into<String>, target: impl Into<String>, dry_run: bool) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            dry_run,
            cancelled: false,
            started_at: Utc::now(),
            entries: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn reject(&mut self, rejected: RejectedRecord) {
        self.rejected.push(rejected);
    }

    pub fn reject_all(&mut self, rejected: impl IntoIterator<Item = RejectedRecord>) {
        self.rejected.extend(rejected);
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn finish(self) -> SyncReport {
        SyncReport {
            source: self.source,
            target: self.target,
            dry_run: self.dry_run,
            cancelled: self.cancelled,
            started_at: self.started_at,
            completed_at: Utc::now(),
            entries: self.entries,
            rejected: self.rejected,
        }
    }
}

/// Immutable outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    source: String,
    target: String,
    dry_run: bool,
    cancelled: bool,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    entries: Vec<ReportEntry>,
    rejected: Vec<RejectedRecord>,
}

impl SyncReport {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Whether the run stopped issuing operations before the end of the plan
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Every entry in execution order
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn rejected(&self) -> &[RejectedRecord] {
        &self.rejected
    }

    pub fn entries_of(&self, kind: OperationKind) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.outcome == Outcome::Failed)
    }

    pub fn counts(&self) -> ReportCounts {
        let mut counts = ReportCounts::default();
        for entry in &self.entries {
            match entry.kind {
                OperationKind::Create => counts.create += 1,
                OperationKind::Update => counts.update += 1,
                OperationKind::Delete => counts.delete += 1,
                OperationKind::Unchanged => counts.unchanged += 1,
                OperationKind::Conflict => counts.conflict += 1,
            }
            match entry.outcome {
                Outcome::Applied => counts.applied += 1,
                Outcome::Skipped => counts.skipped += 1,
                Outcome::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries_of(OperationKind::Conflict).next().is_some()
    }
}
