//! Identity keys used to correlate records across two stores

use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::{Result, SyncError};
use crate::types::{CanonicalRecord, RecordField};

/// Default key parts: the folder path plus the title
pub const DEFAULT_IDENTITY_FIELDS: [RecordField; 2] = [RecordField::Path, RecordField::Title];

/// Default separator when a key is rendered as text
pub const DEFAULT_KEY_SEPARATOR: &str = ":";

/// A projected field value inside a key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Text(String),
    Optional(Option<String>),
    Path(Vec<String>),
    Flag(bool),
    Set(Vec<String>),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Text(s) => f.write_str(s),
            KeyValue::Optional(s) => f.write_str(s.as_deref().unwrap_or("")),
            KeyValue::Path(p) => f.write_str(&p.join("/")),
            KeyValue::Flag(b) => write!(f, "{}", b),
            KeyValue::Set(items) => f.write_str(&items.join(",")),
        }
    }
}

/// Composite of field values; two records correlate iff their keys are equal.
///
/// Parts are kept in schema order regardless of the order the fields were
/// configured in, so `title,path` and `path,title` produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    parts: Vec<(RecordField, KeyValue)>,
}

impl IdentityKey {
    pub fn parts(&self) -> &[(RecordField, KeyValue)] {
        &self.parts
    }

    /// Value projected for one field, if that field is part of the key
    pub fn get(&self, field: RecordField) -> Option<&KeyValue> {
        self.parts
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, value)| value)
    }

    /// Render the key with a custom separator between parts
    pub fn render(&self, separator: &str) -> String {
        self.parts
            .iter()
            .map(|(_, value)| value.to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(DEFAULT_KEY_SEPARATOR))
    }
}

impl Serialize for IdentityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Derives identity keys from a configured set of record fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResolver {
    fields: Vec<RecordField>,
    separator: String,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self {
            fields: DEFAULT_IDENTITY_FIELDS.to_vec(),
            separator: DEFAULT_KEY_SEPARATOR.to_string(),
        }
    }
}

impl IdentityResolver {
    /// Build a resolver; fails before any I/O on an empty or unusable field list
    pub fn new(fields: &[RecordField]) -> Result<Self> {
        if fields.is_empty() {
            return Err(SyncError::InvalidField(
                "at least one identity field is required".to_string(),
            ));
        }
        for field in fields {
            if field.is_sensitive() || *field == RecordField::LastModified {
                return Err(SyncError::InvalidField(format!(
                    "{} cannot be part of an identity key",
                    field
                )));
            }
        }

        let mut fields = fields.to_vec();
        fields.sort();
        fields.dedup();

        Ok(Self {
            fields,
            separator: DEFAULT_KEY_SEPARATOR.to_string(),
        })
    }

    /// Parse a comma separated field list such as `path,title`
    pub fn parse(spec: &str) -> Result<Self> {
        let fields = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<RecordField>>>()?;
        Self::new(&fields)
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Project a record onto its identity key. Pure: no I/O, no secrets.
    pub fn key(&self, record: &CanonicalRecord) -> IdentityKey {
        let parts = self
            .fields
            .iter()
            .map(|field| (*field, project(record, *field)))
            .collect();
        IdentityKey { parts }
    }

    /// Render a key with this resolver's separator
    pub fn render(&self, key: &IdentityKey) -> String {
        key.render(&self.separator)
    }

    /// Reject records whose textual key parts are blank.
    ///
    /// The path may be empty (root folder); every other configured text
    /// field must carry a value for the key to be meaningful.
    pub fn check(&self, record: &CanonicalRecord) -> Result<()> {
        for field in &self.fields {
            let blank = match project(record, *field) {
                KeyValue::Text(s) => s.is_empty(),
                KeyValue::Optional(s) => s.map_or(true, |s| s.is_empty()),
                KeyValue::Path(_) | KeyValue::Flag(_) | KeyValue::Set(_) => false,
            };
            if blank {
                return Err(SyncError::InvalidRecord(format!(
                    "{}: empty identity field {}",
                    record.label(),
                    field
                )));
            }
        }
        Ok(())
    }
}

fn project(record: &CanonicalRecord, field: RecordField) -> KeyValue {
    match field {
        RecordField::Path => KeyValue::Path(record.path.clone()),
        RecordField::Title => KeyValue::Text(record.title.clone()),
        RecordField::Username => KeyValue::Text(record.username.clone()),
        RecordField::Notes => KeyValue::Optional(record.notes.clone()),
        RecordField::Url => KeyValue::Optional(record.url.clone()),
        RecordField::Organization => KeyValue::Optional(record.organization.clone()),
        RecordField::Favorite => KeyValue::Flag(record.favorite),
        RecordField::SyncEnabled => KeyValue::Flag(record.sync_enabled),
        RecordField::Collections => KeyValue::Set(record.collections.iter().cloned().collect()),
        // rejected by IdentityResolver::new
        RecordField::Secret | RecordField::Totp | RecordField::LastModified => {
            KeyValue::Optional(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_default_key_is_path_and_title() {
        let resolver = IdentityResolver::default();
        let rec = CanonicalRecord::new(["Web", "Banking"], "Bank", "alice", "pw");
        assert_eq!(resolver.render(&resolver.key(&rec)), "Web/Banking:Bank");
    }

    #[test]
    fn test_key_ignores_non_identity_fields() {
        let resolver = IdentityResolver::default();
        let a = CanonicalRecord::new(["Web"], "Shop", "bob", "one");
        let b = CanonicalRecord::new(["Web"], "Shop", "rob", "two").modified_at(Utc::now());
        assert_eq!(resolver.key(&a), resolver.key(&b));
    }

    #[test]
    fn test_key_is_case_sensitive_and_path_exact() {
        let resolver = IdentityResolver::default();
        let a = CanonicalRecord::new(["Web"], "Shop", "bob", "pw");
        let b = CanonicalRecord::new(["web"], "Shop", "bob", "pw");
        let c = CanonicalRecord::new(["Web", "Shop"], "", "bob", "pw");
        let d = CanonicalRecord::new(["Web/Shop"], "", "bob", "pw");
        assert_ne!(resolver.key(&a), resolver.key(&b));
        assert_ne!(resolver.key(&c), resolver.key(&d));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let ab = IdentityResolver::parse("title,path").unwrap();
        let ba = IdentityResolver::parse("path, title").unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_unknown_field_fails() {
        let err = IdentityResolver::parse("path,colour").unwrap_err();
        assert!(matches!(err, SyncError::InvalidField(ref f) if f == "colour"));
    }

    #[test]
    fn test_secret_and_empty_lists_rejected() {
        assert!(IdentityResolver::parse("secret").is_err());
        assert!(IdentityResolver::parse("mtime").is_err());
        assert!(IdentityResolver::parse("").is_err());
        assert!(IdentityResolver::new(&[]).is_err());
    }

    #[test]
    fn test_custom_separator() {
        let resolver = IdentityResolver::parse("path,title,username")
            .unwrap()
            .with_separator("|");
        let rec = CanonicalRecord::new(Vec::<String>::new(), "Mail", "carol", "pw");
        assert_eq!(resolver.render(&resolver.key(&rec)), "|Mail|carol");
    }

    #[test]
    fn test_check_blank_text_field() {
        let resolver = IdentityResolver::parse("path,url").unwrap();
        let rec = CanonicalRecord::new(["Web"], "Bank", "alice", "pw");
        assert!(resolver.check(&rec).is_err());
        assert!(resolver.check(&rec.with_url("https://bank")).is_ok());
    }
}
