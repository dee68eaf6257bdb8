//! In-process store, used for tests, benchmarks and embedding callers

use chrono::Utc;
use parking_lot::Mutex;

use super::{locate, locate_existing, StoreAdapter};
use crate::error::{Result, SyncError};
use crate::sync::{IdentityKey, IdentityResolver};
use crate::types::CanonicalRecord;

/// A mutation the store accepted, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create(IdentityKey),
    Update(IdentityKey),
    Delete(IdentityKey),
}

/// Records held in memory, located by identity key and sync flag
pub struct MemoryStore {
    name: String,
    resolver: IdentityResolver,
    records: Mutex<Vec<CanonicalRecord>>,
    journal: Mutex<Vec<Mutation>>,
}

impl MemoryStore {
    /// Create an empty store using the default identity fields
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_resolver(name, IdentityResolver::default())
    }

    /// Create an empty store that locates records with `resolver`
    pub fn with_resolver(name: impl Into<String>, resolver: IdentityResolver) -> Self {
        Self {
            name: name.into(),
            resolver,
            records: Mutex::new(Vec::new()),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Seed records without touching the journal or timestamps
    pub fn with_records(self, records: impl IntoIterator<Item = CanonicalRecord>) -> Self {
        self.records.lock().extend(records);
        self
    }

    /// Snapshot of the current records
    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.records.lock().clone()
    }

    /// Mutations accepted so far
    pub fn mutations(&self) -> Vec<Mutation> {
        self.journal.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn stamped(record: &CanonicalRecord) -> CanonicalRecord {
        let mut record = record.clone();
        record.last_modified = Some(Utc::now());
        record
    }
}

impl StoreAdapter for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_all(&self) -> Result<Vec<CanonicalRecord>> {
        Ok(self.records())
    }

    fn create(&self, record: &CanonicalRecord) -> Result<()> {
        record.validate()?;
        let key = self.resolver.key(record);

        let mut records = self.records.lock();
        if locate(&self.name, &self.resolver, records.iter(), record)?.is_some() {
            return Err(SyncError::StoreWrite(format!(
                "{}: {} already exists",
                self.name, key
            )));
        }
        records.push(Self::stamped(record));
        self.journal.lock().push(Mutation::Create(key));
        Ok(())
    }

    fn update(&self, current: &CanonicalRecord, record: &CanonicalRecord) -> Result<()> {
        record.validate()?;

        let mut records = self.records.lock();
        let idx = locate_existing(&self.name, &self.resolver, records.iter(), current)?;
        records[idx] = Self::stamped(record);
        self.journal
            .lock()
            .push(Mutation::Update(self.resolver.key(current)));
        Ok(())
    }

    fn delete(&self, current: &CanonicalRecord) -> Result<()> {
        let mut records = self.records.lock();
        let idx = locate_existing(&self.name, &self.resolver, records.iter(), current)?;
        records.remove(idx);
        self.journal
            .lock()
            .push(Mutation::Delete(self.resolver.key(current)));
        Ok(())
    }
}
