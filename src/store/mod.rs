//! Store adapters
//!
//! This module defines the `StoreAdapter` trait that every backing store must
//! implement. The reconciliation core only ever talks to this trait, so a
//! local vault file and a remote password service are interchangeable as
//! either side of a run.
//!
//! # Design Principles
//!
//! 1. **Sync Interface**: All methods are blocking. The binary offloads a
//!    whole run to a blocking thread instead of making the trait async.
//!
//! 2. **Canonical Records Only**: Adapters normalize their native shape
//!    (group paths, property bags, custom fields) into `CanonicalRecord`
//!    before handing anything to the core.
//!
//! 3. **Immutable Self**: Methods take `&self`; adapters use interior
//!    mutability so that enumeration can run on a scoped thread.
//!
//! 4. **Atomic Mutations**: Each `create`/`update`/`delete` is either fully
//!    applied or not applied at all.
//!
//! 5. **Flag-Partitioned Lookup**: A stored entry is located by its identity
//!    key together with its sync flag. Entries with and without the flag
//!    never stand in for each other, so an entry a run did not admit is never
//!    overwritten or deleted on behalf of one it did.

pub mod bitwarden;
pub mod memory;
pub mod vault;

pub use bitwarden::{BitwardenCredentials, BitwardenStore, BwCli, CommandRunner};
pub use memory::{MemoryStore, Mutation};
pub use vault::{KdfParams, VaultStore};

use std::borrow::Borrow;

use crate::error::{Result, SyncError};
use crate::sync::IdentityResolver;
use crate::types::CanonicalRecord;

/// Property-bag names used to carry canonical fields a store has no slot for
pub const PWS_TOTP: &str = "pws_totp";
pub const PWS_FAVORITE: &str = "pws_fav";
pub const PWS_ORGANIZATION: &str = "pws_org";
pub const PWS_COLLECTIONS: &str = "pws_col";
pub const PWS_SYNC: &str = "pws_sync";

/// Capability interface every backing store implements
pub trait StoreAdapter: Send + Sync {
    /// Human readable store name used in logs and errors
    fn name(&self) -> &str;

    /// Enumerate every record of the store.
    ///
    /// Fails with `SyncError::StoreRead` on I/O or authentication failure.
    fn list_all(&self) -> Result<Vec<CanonicalRecord>>;

    /// Create a record
    fn create(&self, record: &CanonicalRecord) -> Result<()>;

    /// Overwrite the stored entry holding `current` with the content of `record`.
    ///
    /// `current` is the record as `list_all` returned it.
    fn update(&self, current: &CanonicalRecord, record: &CanonicalRecord) -> Result<()>;

    /// Delete the stored entry holding `current`
    fn delete(&self, current: &CanonicalRecord) -> Result<()>;
}

impl<T: StoreAdapter + ?Sized> StoreAdapter for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn list_all(&self) -> Result<Vec<CanonicalRecord>> {
        (**self).list_all()
    }

    fn create(&self, record: &CanonicalRecord) -> Result<()> {
        (**self).create(record)
    }

    fn update(&self, current: &CanonicalRecord, record: &CanonicalRecord) -> Result<()> {
        (**self).update(current, record)
    }

    fn delete(&self, current: &CanonicalRecord) -> Result<()> {
        (**self).delete(current)
    }
}

/// Index of the stored entry holding `record`, if any.
///
/// An entry holds `record` when both share the identity key and the sync
/// flag. More than one such entry is an `AmbiguousIdentity` error.
pub(crate) fn locate<R: Borrow<CanonicalRecord>>(
    store: &str,
    resolver: &IdentityResolver,
    entries: impl IntoIterator<Item = R>,
    record: &CanonicalRecord,
) -> Result<Option<usize>> {
    let key = resolver.key(record);
    let mut found = None;

    for (idx, entry) in entries.into_iter().enumerate() {
        let entry = entry.borrow();
        if entry.sync_enabled != record.sync_enabled || resolver.key(entry) != key {
            continue;
        }
        if found.is_some() {
            return Err(SyncError::AmbiguousIdentity {
                store: store.to_string(),
                key: resolver.render(&key),
            });
        }
        found = Some(idx);
    }

    Ok(found)
}

/// Like `locate`, failing with `NotFound` when no entry holds `record`
pub(crate) fn locate_existing<R: Borrow<CanonicalRecord>>(
    store: &str,
    resolver: &IdentityResolver,
    entries: impl IntoIterator<Item = R>,
    record: &CanonicalRecord,
) -> Result<usize> {
    locate(store, resolver, entries, record)?.ok_or_else(|| {
        SyncError::NotFound(format!("{}: {}", store, resolver.render(&resolver.key(record))))
    })
}
