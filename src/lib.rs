//! pwsync - one-way credential store reconciliation
//!
//! Synchronizes login records from a source password store into a target
//! store: records are matched by a configurable identity key, differences
//! are classified as create/update/delete/conflict, and the non-conflicting
//! ones are applied to the target with per-record failure isolation.

pub mod error;
pub mod store;
pub mod sync;
pub mod types;

pub use error::{Result, SyncError};
pub use store::StoreAdapter;
pub use sync::{run, SyncConfig, SyncReport};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
