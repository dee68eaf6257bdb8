//! Loading one side of a run through the store adapter boundary

use super::report::RejectedRecord;
use super::IdentityResolver;
use crate::error::{Result, SyncError};
use crate::store::StoreAdapter;
use crate::types::{CanonicalRecord, SyncScope};

/// The admitted records of one store plus what was turned away
#[derive(Debug, Clone)]
pub struct Dataset {
    pub store: String,
    pub records: Vec<CanonicalRecord>,
    pub rejected: Vec<RejectedRecord>,
}

impl Dataset {
    /// Enumerate `adapter`, keep records in `scope` and reject invalid ones.
    ///
    /// Any enumeration failure is reported as a read error of this store.
    /// Invalid records are logged and carried along, they never fail the load.
    pub fn load(
        adapter: &dyn StoreAdapter,
        scope: SyncScope,
        resolver: &IdentityResolver,
    ) -> Result<Self> {
        let store = adapter.name().to_string();
        let listed = adapter.list_all().map_err(|e| match e {
            SyncError::StoreRead { .. } => e,
            other => SyncError::read(&store, other),
        })?;
        let total = listed.len();

        let mut records = Vec::with_capacity(total);
        let mut rejected = Vec::new();
        for record in listed.into_iter().filter(|r| scope.admits(r)) {
            match record.validate().and_then(|_| resolver.check(&record)) {
                Ok(()) => records.push(record),
                Err(e) => {
                    tracing::warn!("{}: skipping {}: {}", store, record.label(), e);
                    rejected.push(RejectedRecord {
                        store: store.clone(),
                        label: record.label(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            "{}: {} records listed, {} in scope, {} rejected",
            store,
            total,
            records.len() + rejected.len(),
            rejected.len()
        );

        Ok(Self {
            store,
            records,
            rejected,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
