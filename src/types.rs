//! Core types for pwsync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Result, SyncError};

/// One credential, independent of the store it came from
#[derive(Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    /// Folder/group location, outermost first
    pub path: Vec<String>,
    pub title: String,
    pub username: String,
    /// The password. Compared by equality only, never logged
    pub secret: String,
    pub notes: Option<String>,
    pub url: Option<String>,
    /// One-time-password seed
    pub totp: Option<String>,
    pub favorite: bool,
    /// Required when `collections` is non-empty
    pub organization: Option<String>,
    pub collections: BTreeSet<String>,
    /// Records with this unset stay out of a flagged run
    pub sync_enabled: bool,
    /// Store-reported modification time, used only for conflict detection
    pub last_modified: Option<DateTime<Utc>>,
}

impl CanonicalRecord {
    /// Create a record with the mandatory fields; sync is enabled by default
    pub fn new<P, S>(
        path: P,
        title: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            title: title.into(),
            username: username.into(),
            secret: secret.into(),
            notes: None,
            url: None,
            totp: None,
            favorite: false,
            organization: None,
            collections: BTreeSet::new(),
            sync_enabled: true,
            last_modified: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_totp(mut self, totp: impl Into<String>) -> Self {
        self.totp = Some(totp.into());
        self
    }

    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sync(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    pub fn modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Path rendered as a folder string (`Web/Banking`)
    pub fn folder(&self) -> String {
        self.path.join("/")
    }

    /// Short human label that never contains the secret
    pub fn label(&self) -> String {
        if self.path.is_empty() {
            format!("{} ({})", self.title, self.username)
        } else {
            format!("{}/{} ({})", self.folder(), self.title, self.username)
        }
    }

    /// Check the schema invariants every adapter must uphold
    pub fn validate(&self) -> Result<()> {
        if self.title.is_empty() {
            return Err(SyncError::InvalidRecord("empty title".to_string()));
        }
        if self.username.is_empty() {
            return Err(SyncError::InvalidRecord(format!(
                "{}: empty username",
                self.title
            )));
        }
        if !self.collections.is_empty() && self.organization.is_none() {
            return Err(SyncError::InvalidRecord(format!(
                "{}: collections require an organization",
                self.title
            )));
        }
        Ok(())
    }

    /// Fields whose values differ, in schema order. `last_modified` is never compared.
    pub fn differing_fields(&self, other: &CanonicalRecord) -> Vec<RecordField> {
        RecordField::COMPARED
            .iter()
            .copied()
            .filter(|field| !self.field_eq(other, *field))
            .collect()
    }

    /// Equal in every compared field
    pub fn same_content(&self, other: &CanonicalRecord) -> bool {
        self.differing_fields(other).is_empty()
    }

    fn field_eq(&self, other: &CanonicalRecord, field: RecordField) -> bool {
        match field {
            RecordField::Path => self.path == other.path,
            RecordField::Title => self.title == other.title,
            RecordField::Username => self.username == other.username,
            RecordField::Secret => self.secret == other.secret,
            RecordField::Notes => self.notes == other.notes,
            RecordField::Url => self.url == other.url,
            RecordField::Totp => self.totp == other.totp,
            RecordField::Favorite => self.favorite == other.favorite,
            RecordField::Organization => self.organization == other.organization,
            RecordField::Collections => self.collections == other.collections,
            RecordField::SyncEnabled => self.sync_enabled == other.sync_enabled,
            RecordField::LastModified => true,
        }
    }
}

impl std::fmt::Debug for CanonicalRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanonicalRecord")
            .field("path", &self.path)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("notes", &self.notes)
            .field("url", &self.url)
            .field("totp", &self.totp.as_ref().map(|_| "[REDACTED]"))
            .field("favorite", &self.favorite)
            .field("organization", &self.organization)
            .field("collections", &self.collections)
            .field("sync_enabled", &self.sync_enabled)
            .field("last_modified", &self.last_modified)
            .finish()
    }
}

/// Attribute names of the canonical schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    Path,
    Title,
    Username,
    Secret,
    Notes,
    Url,
    Totp,
    Favorite,
    Organization,
    Collections,
    SyncEnabled,
    LastModified,
}

impl RecordField {
    /// Every field that takes part in content comparison
    pub const COMPARED: [RecordField; 11] = [
        RecordField::Path,
        RecordField::Title,
        RecordField::Username,
        RecordField::Secret,
        RecordField::Notes,
        RecordField::Url,
        RecordField::Totp,
        RecordField::Favorite,
        RecordField::Organization,
        RecordField::Collections,
        RecordField::SyncEnabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::Path => "path",
            RecordField::Title => "title",
            RecordField::Username => "username",
            RecordField::Secret => "secret",
            RecordField::Notes => "notes",
            RecordField::Url => "url",
            RecordField::Totp => "totp",
            RecordField::Favorite => "favorite",
            RecordField::Organization => "organization",
            RecordField::Collections => "collections",
            RecordField::SyncEnabled => "sync_enabled",
            RecordField::LastModified => "last_modified",
        }
    }

    /// Values of these fields must never appear in keys, logs or reports
    pub fn is_sensitive(&self) -> bool {
        matches!(self, RecordField::Secret | RecordField::Totp)
    }
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordField {
    type Err = SyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "path" | "folder" => Ok(RecordField::Path),
            "title" => Ok(RecordField::Title),
            "username" | "name" => Ok(RecordField::Username),
            "secret" | "password" => Ok(RecordField::Secret),
            "notes" | "note" => Ok(RecordField::Notes),
            "url" => Ok(RecordField::Url),
            "totp" => Ok(RecordField::Totp),
            "favorite" => Ok(RecordField::Favorite),
            "organization" => Ok(RecordField::Organization),
            "collections" => Ok(RecordField::Collections),
            "sync" | "sync_enabled" | "syncEnabled" => Ok(RecordField::SyncEnabled),
            "last_modified" | "lastModified" | "mtime" => Ok(RecordField::LastModified),
            other => Err(SyncError::InvalidField(other.to_string())),
        }
    }
}

/// Which records of a store take part in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncScope {
    /// Only records whose sync flag is set
    #[default]
    Flagged,
    /// Every record of the store
    All,
}

impl SyncScope {
    pub fn admits(&self, record: &CanonicalRecord) -> bool {
        match self {
            SyncScope::Flagged => record.sync_enabled,
            SyncScope::All => true,
        }
    }
}

/// Interpret a loosely typed flag value stored as text
pub fn to_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "t" | "1" | "yes" | "y" | "on" | "pass" | "success" | "ok" | "oke"
    )
}
