//! Conflict detection for update candidates

use super::Operation;
use crate::types::CanonicalRecord;

/// Decides whether an update candidate would overwrite a newer target edit.
///
/// A candidate becomes a conflict iff both timestamps are known and the
/// target's is strictly newer. An unknown timestamp on either side never
/// counts as evidence of a conflict, and equal timestamps are an update.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictPolicy;

impl ConflictPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Check a differing pair
    pub fn is_conflict(&self, source: &CanonicalRecord, target: &CanonicalRecord) -> bool {
        match (source.last_modified, target.last_modified) {
            (Some(source_time), Some(target_time)) => target_time > source_time,
            _ => false,
        }
    }

    /// Turn an `Update` candidate into a `Conflict` when the target is newer.
    /// Every other operation passes through untouched.
    pub fn resolve(&self, operation: Operation) -> Operation {
        match operation {
            Operation::Update {
                key,
                source,
                target,
                changed,
            } if self.is_conflict(&source, &target) => {
                tracing::debug!("conflict: {}", key);
                Operation::Conflict {
                    key,
                    source,
                    target,
                    changed,
                }
            }
            other => other,
        }
    }

    /// Resolve every operation of a plan, keeping order
    pub fn apply(&self, operations: Vec<Operation>) -> Vec<Operation> {
        operations.into_iter().map(|op| self.resolve(op)).collect()
    }

    /// Human readable reason for a conflict
    pub fn describe(&self, source: &CanonicalRecord, target: &CanonicalRecord) -> String {
        match (source.last_modified, target.last_modified) {
            (Some(s), Some(t)) => format!(
                "target modified {} after source {}",
                t.format("%Y-%m-%d %H:%M:%S"),
                s.format("%Y-%m-%d %H:%M:%S")
            ),
            _ => "target modified after source".to_string(),
        }
    }
}
