//! Matching and classification of two record sets

use std::collections::HashMap;

use super::{IdentityKey, IdentityResolver, Operation};
use crate::error::{Result, SyncError};
use crate::types::CanonicalRecord;

/// Matches records by identity key and classifies each key into one operation
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    resolver: IdentityResolver,
    source_name: String,
    target_name: String,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(IdentityResolver::default())
    }
}

impl ReconciliationEngine {
    pub fn new(resolver: IdentityResolver) -> Self {
        Self {
            resolver,
            source_name: "source".to_string(),
            target_name: "target".to_string(),
        }
    }

    /// Name the two sides for error messages
    pub fn with_store_names(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.source_name = source.into();
        self.target_name = target.into();
        self
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Classify `source` against `target`.
    ///
    /// Creates, updates and unchanged entries follow source order, deletes
    /// follow target order and come last. Differing pairs are returned as
    /// `Update` candidates; `ConflictPolicy` decides which of them conflict.
    /// Pure: the same two snapshots always yield the same sequence.
    pub fn reconcile(
        &self,
        source: &[CanonicalRecord],
        target: &[CanonicalRecord],
    ) -> Result<Vec<Operation>> {
        let source_keys = self.index(&self.source_name, source)?;
        let target_keys = self.index(&self.target_name, target)?;

        let target_by_key: HashMap<&IdentityKey, &CanonicalRecord> =
            target_keys.iter().zip(target).collect();
        let source_by_key: HashMap<&IdentityKey, &CanonicalRecord> =
            source_keys.iter().zip(source).collect();

        let mut operations = Vec::with_capacity(source.len().max(target.len()));

        for (key, from) in source_keys.iter().zip(source) {
            let op = match target_by_key.get(key) {
                None => Operation::Create {
                    key: key.clone(),
                    source: from.clone(),
                },
                Some(to) => {
                    let changed = from.differing_fields(to);
                    if changed.is_empty() {
                        Operation::Unchanged { key: key.clone() }
                    } else {
                        Operation::Update {
                            key: key.clone(),
                            source: from.clone(),
                            target: (*to).clone(),
                            changed,
                        }
                    }
                }
            };
            tracing::debug!("{}: {}", op.kind(), self.resolver.render(key));
            operations.push(op);
        }

        for (key, to) in target_keys.iter().zip(target) {
            if !source_by_key.contains_key(key) {
                tracing::debug!("delete: {}", self.resolver.render(key));
                operations.push(Operation::Delete {
                    key: key.clone(),
                    target: to.clone(),
                });
            }
        }

        Ok(operations)
    }

    /// Keys of `records` in order, failing on the first duplicate
    fn index(&self, store: &str, records: &[CanonicalRecord]) -> Result<Vec<IdentityKey>> {
        let mut seen: HashMap<IdentityKey, usize> = HashMap::with_capacity(records.len());
        let mut keys = Vec::with_capacity(records.len());

        for (idx, record) in records.iter().enumerate() {
            let key = self.resolver.key(record);
            if seen.insert(key.clone(), idx).is_some() {
                return Err(SyncError::AmbiguousIdentity {
                    store: store.to_string(),
                    key: self.resolver.render(&key),
                });
            }
            keys.push(key);
        }

        Ok(keys)
    }
}
