//! Local encrypted vault file (RML-style single-file container)
//!
//! The file is a small JSON envelope around an AES-256-GCM ciphertext. The
//! key is derived from the master passphrase with Argon2id; salt and KDF
//! parameters live in the envelope so a vault opens anywhere.
//!
//! Entries keep their native shape: a group path, the classic
//! title/username/password/url/notes slots and a free-form string property
//! bag. Canonical fields without a native slot (TOTP, favorite,
//! organization, collections, sync flag) ride in that bag under `pws_*`
//! names and are normalized on the way in and out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    locate, locate_existing, StoreAdapter, PWS_COLLECTIONS, PWS_FAVORITE, PWS_ORGANIZATION,
    PWS_SYNC, PWS_TOTP,
};
use crate::error::{Result, SyncError};
use crate::sync::IdentityResolver;
use crate::types::{to_bool, CanonicalRecord};

const FORMAT: &str = "pwsync-vault";
const FORMAT_VERSION: u32 = 1;
const KEY_SIZE: usize = 32;
const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;

/// Argon2id parameters, stored in the vault envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Iterations
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP baseline for Argon2id
        Self {
            memory_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for throwaway vaults such as test fixtures
    pub fn light() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct VaultKey([u8; KEY_SIZE]);

impl VaultKey {
    fn derive(passphrase: &str, salt: &[u8; SALT_SIZE], kdf: &KdfParams) -> Result<Self> {
        let params = Params::new(
            kdf.memory_cost,
            kdf.time_cost,
            kdf.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| SyncError::Encryption(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| SyncError::Encryption(e.to_string()))?;
        Ok(Self(key))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0).map_err(|e| SyncError::Encryption(e.to_string()))
    }
}

/// On-disk envelope
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    kdf: KdfParams,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// Decrypted vault content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VaultDocument {
    #[serde(default)]
    entries: Vec<VaultEntry>,
}

/// One entry in its native shape
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultEntry {
    uuid: Uuid,
    #[serde(default)]
    group: Vec<String>,
    title: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    modified: DateTime<Utc>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl VaultEntry {
    fn from_record(record: &CanonicalRecord) -> Self {
        let mut entry = Self {
            uuid: Uuid::new_v4(),
            group: Vec::new(),
            title: String::new(),
            username: String::new(),
            password: String::new(),
            url: None,
            notes: None,
            modified: Utc::now(),
            properties: BTreeMap::new(),
        };
        entry.assign(record);
        entry
    }

    /// Overwrite every canonical field, keeping the uuid and foreign properties
    fn assign(&mut self, record: &CanonicalRecord) {
        self.group = record.path.clone();
        self.title = record.title.clone();
        self.username = record.username.clone();
        self.password = record.secret.clone();
        self.url = record.url.clone();
        self.notes = record.notes.clone();
        self.modified = Utc::now();

        set_property(&mut self.properties, PWS_TOTP, record.totp.clone());
        set_property(
            &mut self.properties,
            PWS_FAVORITE,
            record.favorite.then(|| "true".to_string()),
        );
        set_property(
            &mut self.properties,
            PWS_ORGANIZATION,
            record.organization.clone(),
        );
        let collections = if record.collections.is_empty() {
            None
        } else {
            serde_json::to_string(&record.collections).ok()
        };
        set_property(&mut self.properties, PWS_COLLECTIONS, collections);
        set_property(
            &mut self.properties,
            PWS_SYNC,
            record.sync_enabled.then(|| "true".to_string()),
        );
    }

    fn to_record(&self) -> CanonicalRecord {
        let props = &self.properties;
        let collections = match props.get(PWS_COLLECTIONS) {
            Some(raw) => serde_json::from_str::<Vec<String>>(raw).unwrap_or_else(|e| {
                tracing::warn!("{}: unreadable {} ({}), ignored", self.title, PWS_COLLECTIONS, e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        CanonicalRecord {
            path: self.group.clone(),
            title: self.title.clone(),
            username: self.username.clone(),
            secret: self.password.clone(),
            notes: self.notes.clone().filter(|s| !s.is_empty()),
            url: self.url.clone().filter(|s| !s.is_empty()),
            totp: props.get(PWS_TOTP).cloned(),
            favorite: props.get(PWS_FAVORITE).map_or(false, |v| to_bool(v)),
            organization: props.get(PWS_ORGANIZATION).cloned(),
            collections: collections.into_iter().collect(),
            sync_enabled: props.get(PWS_SYNC).map_or(false, |v| to_bool(v)),
            last_modified: Some(self.modified),
        }
    }
}

fn set_property(props: &mut BTreeMap<String, String>, name: &str, value: Option<String>) {
    match value {
        Some(v) => {
            props.insert(name.to_string(), v);
        }
        None => {
            props.remove(name);
        }
    }
}

/// Credential vault in a single encrypted file
pub struct VaultStore {
    name: String,
    path: PathBuf,
    resolver: IdentityResolver,
    kdf: KdfParams,
    salt: [u8; SALT_SIZE],
    key: VaultKey,
    doc: Mutex<VaultDocument>,
}

impl VaultStore {
    /// Open a vault. A missing file opens as an empty vault that is written
    /// on its first change.
    pub fn open(
        path: impl AsRef<Path>,
        passphrase: &str,
        resolver: IdentityResolver,
    ) -> Result<Self> {
        Self::open_with_params(path, passphrase, resolver, KdfParams::default())
    }

    /// Like `open`, with explicit KDF parameters for a newly created vault.
    /// An existing vault always uses the parameters recorded in its file.
    pub fn open_with_params(
        path: impl AsRef<Path>,
        passphrase: &str,
        resolver: IdentityResolver,
        kdf: KdfParams,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();

        if !path.exists() {
            let mut salt = [0u8; SALT_SIZE];
            rand::rngs::OsRng.fill_bytes(&mut salt);
            let key = VaultKey::derive(passphrase, &salt, &kdf)?;
            tracing::info!("{} does not exist yet, starting an empty vault", name);
            return Ok(Self {
                name,
                path,
                resolver,
                kdf,
                salt,
                key,
                doc: Mutex::new(VaultDocument::default()),
            });
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| SyncError::read(&name, e))?;
        let envelope: Envelope =
            serde_json::from_str(&raw).map_err(|e| SyncError::read(&name, e))?;
        if envelope.format != FORMAT || envelope.version != FORMAT_VERSION {
            return Err(SyncError::read(
                &name,
                format!(
                    "unsupported vault format {} v{}",
                    envelope.format, envelope.version
                ),
            ));
        }

        let salt: [u8; SALT_SIZE] =
            decode_fixed(&envelope.salt).map_err(|e| SyncError::read(&name, e))?;
        let nonce: [u8; NONCE_SIZE] =
            decode_fixed(&envelope.nonce).map_err(|e| SyncError::read(&name, e))?;
        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| SyncError::read(&name, e))?;

        let key = VaultKey::derive(passphrase, &salt, &envelope.kdf)?;
        let plaintext = key
            .cipher()?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| SyncError::read(&name, "wrong passphrase or corrupted vault"))?;
        let doc: VaultDocument =
            serde_json::from_slice(&plaintext).map_err(|e| SyncError::read(&name, e))?;

        tracing::debug!("Opened vault {} ({} entries)", name, doc.entries.len());

        Ok(Self {
            name,
            path,
            resolver,
            kdf: envelope.kdf,
            salt,
            key,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encrypt `doc` and replace the file in one rename
    fn save(&self, doc: &VaultDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let plaintext = serde_json::to_vec(doc)?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .key
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| SyncError::Encryption(e.to_string()))?;

        let envelope = Envelope {
            format: FORMAT.to_string(),
            version: FORMAT_VERSION,
            kdf: self.kdf,
            salt: BASE64.encode(self.salt),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        };

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, serde_json::to_vec_pretty(&envelope)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `change` to a copy of the document, save it, then commit in memory
    fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut VaultDocument) -> Result<()>,
    {
        let mut doc = self.doc.lock();
        let mut next = doc.clone();
        change(&mut next)?;
        self.save(&next)
            .map_err(|e| SyncError::StoreWrite(format!("{}: {}", self.name, e)))?;
        *doc = next;
        Ok(())
    }

    fn records(doc: &VaultDocument) -> impl Iterator<Item = CanonicalRecord> + '_ {
        doc.entries.iter().map(VaultEntry::to_record)
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> std::result::Result<[u8; N], String> {
    let bytes = BASE64.decode(encoded).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected {} bytes, found {}", N, b.len()))
}

impl StoreAdapter for VaultStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_all(&self) -> Result<Vec<CanonicalRecord>> {
        Ok(self.doc.lock().entries.iter().map(VaultEntry::to_record).collect())
    }

    fn create(&self, record: &CanonicalRecord) -> Result<()> {
        record.validate()?;
        self.mutate(|doc| {
            if locate(&self.name, &self.resolver, Self::records(doc), record)?.is_some() {
                return Err(SyncError::StoreWrite(format!(
                    "{}: {} already exists",
                    self.name,
                    self.resolver.render(&self.resolver.key(record))
                )));
            }
            doc.entries.push(VaultEntry::from_record(record));
            Ok(())
        })
    }

    fn update(&self, current: &CanonicalRecord, record: &CanonicalRecord) -> Result<()> {
        record.validate()?;
        self.mutate(|doc| {
            let idx = locate_existing(&self.name, &self.resolver, Self::records(doc), current)?;
            doc.entries[idx].assign(record);
            Ok(())
        })
    }

    fn delete(&self, current: &CanonicalRecord) -> Result<()> {
        self.mutate(|doc| {
            let idx = locate_existing(&self.name, &self.resolver, Self::records(doc), current)?;
            doc.entries.remove(idx);
            Ok(())
        })
    }
}
