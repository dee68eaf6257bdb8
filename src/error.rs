//! Error types for pwsync

use thiserror::Error;

/// Result type alias for pwsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for pwsync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid identity field: {0}")]
    InvalidField(String),

    #[error("Ambiguous identity in {store}: more than one record has key {key}")]
    AmbiguousIdentity { store: String, key: String },

    #[error("Failed to read {store}: {message}")]
    StoreRead { store: String, message: String },

    #[error("Store write error: {0}")]
    StoreWrite(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl SyncError {
    /// Wrap any displayable failure as a read error of the named store
    pub fn read(store: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::StoreRead {
            store: store.into(),
            message: err.to_string(),
        }
    }

    /// Check if the error aborts a whole run rather than a single operation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidField(_)
                | SyncError::AmbiguousIdentity { .. }
                | SyncError::StoreRead { .. }
                | SyncError::Encryption(_)
                | SyncError::Config(_)
        )
    }

    /// Process exit code for an error that ended the run
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Cancelled => 130,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SyncError::InvalidField("colour".into()).is_fatal());
        assert!(SyncError::AmbiguousIdentity {
            store: "vault".into(),
            key: "Web:Bank".into()
        }
        .is_fatal());
        assert!(SyncError::read("bitwarden", "locked").is_fatal());
        assert!(!SyncError::StoreWrite("disk full".into()).is_fatal());
        assert!(!SyncError::Unsupported("collections update".into()).is_fatal());
    }

    #[test]
    fn test_read_error_message() {
        let err = SyncError::read("vault.pws", "bad passphrase");
        assert_eq!(err.to_string(), "Failed to read vault.pws: bad passphrase");
        assert_eq!(err.exit_code(), 2);
    }
}
