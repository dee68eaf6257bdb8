//! Bitwarden vault accessed through the official `bw` command line client
//!
//! Every process call goes through [`CommandRunner`] so the adapter can be
//! driven by a scripted fake in tests. Object bodies are passed to `bw` as
//! base64 encoded JSON on stdin and secrets travel in environment variables,
//! never on the command line.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{locate, locate_existing, StoreAdapter, PWS_SYNC};
use crate::error::{Result, SyncError};
use crate::sync::IdentityResolver;
use crate::types::{to_bool, CanonicalRecord};

/// Item type of a login entry; other types are not synchronized
const LOGIN_TYPE: u8 = 1;

/// Runs the `bw` executable
pub trait CommandRunner: Send + Sync {
    /// Run with `args`, extra environment and optional stdin, returning stdout.
    /// A non-zero exit status is an error.
    fn run(&self, args: &[&str], env: &[(&str, &str)], input: Option<&str>) -> io::Result<String>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    fn run(&self, args: &[&str], env: &[(&str, &str)], input: Option<&str>) -> io::Result<String> {
        (**self).run(args, env, input)
    }
}

/// The real `bw` client
#[derive(Debug, Clone)]
pub struct BwCli {
    program: PathBuf,
}

impl Default for BwCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("bw"),
        }
    }
}

impl BwCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific executable instead of `bw` from `PATH`
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CommandRunner for BwCli {
    fn run(&self, args: &[&str], env: &[(&str, &str)], input: Option<&str>) -> io::Result<String> {
        tracing::debug!("bw {}", args.join(" "));

        let mut child = Command::new(&self.program)
            .args(args)
            .envs(env.iter().copied())
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "bw {} failed ({}): {}",
                    args.iter().find(|a| !a.starts_with('-')).unwrap_or(&""),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        String::from_utf8(output.stdout).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// API key and master password used to open a session
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct BitwardenCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub master_password: Option<String>,
}

impl std::fmt::Debug for BitwardenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitwardenCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field(
                "master_password",
                &self.master_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BwStatus {
    status: String,
    #[serde(default)]
    user_id: Option<String>,
}

/// Folder, organization or collection
#[derive(Debug, Clone, Deserialize)]
struct BwNamed {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BwUri {
    #[serde(default)]
    uri: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BwLogin {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    totp: Option<String>,
    #[serde(default)]
    uris: Option<Vec<BwUri>>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BwField {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(rename = "type", default)]
    kind: u8,
}

/// Item as printed and accepted by `bw`; unknown attributes survive an edit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BwItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
    name: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    favorite: bool,
    #[serde(default)]
    folder_id: Option<String>,
    #[serde(default)]
    organization_id: Option<String>,
    #[serde(default)]
    collection_ids: Option<Vec<String>>,
    #[serde(default)]
    fields: Option<Vec<BwField>>,
    #[serde(default)]
    login: Option<BwLogin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision_date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl BwItem {
    fn sync_flag(&self) -> bool {
        self.fields
            .iter()
            .flatten()
            .find(|f| f.name.as_deref() == Some(PWS_SYNC))
            .and_then(|f| f.value.as_deref())
            .map_or(false, to_bool)
    }

    fn set_sync_flag(&mut self, enabled: bool) {
        let fields = self.fields.get_or_insert_with(Vec::new);
        let value = Some(enabled.to_string());
        match fields.iter_mut().find(|f| f.name.as_deref() == Some(PWS_SYNC)) {
            Some(field) => field.value = value,
            None => fields.push(BwField {
                name: Some(PWS_SYNC.to_string()),
                value,
                kind: 0,
            }),
        }
    }

    fn url(&self) -> Option<String> {
        self.login
            .as_ref()
            .and_then(|l| l.uris.as_ref())
            .and_then(|uris| uris.first())
            .and_then(|u| u.uri.clone())
    }
}

/// Names of the containers an item refers to, plus the login items seen by
/// the last enumeration with their ids
#[derive(Debug, Default)]
struct Catalog {
    folders: HashMap<String, String>,
    organizations: HashMap<String, String>,
    collections: HashMap<String, String>,
    items: Vec<(CanonicalRecord, String)>,
}

impl Catalog {
    fn id_of(names: &HashMap<String, String>, name: &str) -> Option<String> {
        names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| id.clone())
    }

    fn canonical(&self, item: &BwItem) -> CanonicalRecord {
        let lookup = |names: &HashMap<String, String>, id: &Option<String>| {
            id.as_ref().and_then(|id| names.get(id)).cloned()
        };
        let login = item.login.clone().unwrap_or_default();

        CanonicalRecord {
            path: lookup(&self.folders, &item.folder_id)
                .map(|folder| {
                    folder
                        .split('/')
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            title: item.name.clone(),
            username: login.username.clone().unwrap_or_default(),
            secret: login.password.clone().unwrap_or_default(),
            notes: item.notes.clone().filter(|s| !s.is_empty()),
            url: item.url().filter(|s| !s.is_empty()),
            totp: login.totp.clone().filter(|s| !s.is_empty()),
            favorite: item.favorite,
            organization: lookup(&self.organizations, &item.organization_id),
            collections: item
                .collection_ids
                .iter()
                .flatten()
                .filter_map(|id| self.collections.get(id).cloned())
                .collect(),
            sync_enabled: item.sync_flag(),
            last_modified: item.revision_date,
        }
    }
}

/// Remote Bitwarden vault
pub struct BitwardenStore {
    name: String,
    runner: Box<dyn CommandRunner>,
    resolver: IdentityResolver,
    session: Option<String>,
    catalog: Mutex<Catalog>,
}

impl BitwardenStore {
    /// Log in and unlock as needed, then sync the local client cache
    pub fn connect(
        runner: impl CommandRunner + 'static,
        credentials: &BitwardenCredentials,
        resolver: IdentityResolver,
    ) -> Result<Self> {
        let name = "bitwarden".to_string();
        let runner: Box<dyn CommandRunner> = Box::new(runner);
        let read_err = |e: io::Error| SyncError::read("bitwarden", e);

        let raw = runner.run(&["--raw", "status"], &[], None).map_err(read_err)?;
        let status: BwStatus =
            serde_json::from_str(raw.trim()).map_err(|e| SyncError::read(&name, e))?;
        let mut state = status.status;
        tracing::debug!("bw status: {}", state);

        // A session of another account must not be reused
        if let (Some(client_id), Some(user_id)) = (&credentials.client_id, &status.user_id) {
            if state != "unauthenticated" && *client_id != format!("user.{}", user_id) {
                tracing::info!("Logging out of the current bw account");
                for command in ["lock", "logout"] {
                    if let Err(e) = runner.run(&["--quiet", command], &[], None) {
                        tracing::warn!("bw {} failed: {}", command, e);
                    }
                }
                state = "unauthenticated".to_string();
            }
        }

        if state == "unauthenticated" {
            let mut env = Vec::new();
            if let Some(id) = credentials.client_id.as_deref() {
                env.push(("BW_CLIENTID", id));
            }
            if let Some(secret) = credentials.client_secret.as_deref() {
                env.push(("BW_CLIENTSECRET", secret));
            }
            runner
                .run(&["--raw", "login", "--apikey"], &env, None)
                .map_err(read_err)?;
            state = "locked".to_string();
        }

        let session = if state == "locked" {
            let password = credentials.master_password.as_deref().ok_or_else(|| {
                SyncError::Config("a master password is required to unlock bitwarden".to_string())
            })?;
            let session = runner
                .run(
                    &["--raw", "unlock", "--passwordenv=BW_MASTER_PASSWORD"],
                    &[("BW_MASTER_PASSWORD", password)],
                    None,
                )
                .map_err(read_err)?;
            Some(session.trim().to_string())
        } else {
            // unlocked: the session comes from the inherited BW_SESSION
            None
        };

        let store = Self {
            name,
            runner,
            resolver,
            session,
            catalog: Mutex::new(Catalog::default()),
        };
        store
            .bw(&["sync"], None)
            .map_err(|e| SyncError::read(&store.name, e))?;
        tracing::info!("Connected to bitwarden");
        Ok(store)
    }

    fn bw(&self, args: &[&str], input: Option<&str>) -> io::Result<String> {
        match &self.session {
            Some(session) => self.runner.run(args, &[("BW_SESSION", session)], input),
            None => self.runner.run(args, &[], input),
        }
    }

    fn bw_json<T: serde::de::DeserializeOwned>(
        &self,
        args: &[&str],
        input: Option<&str>,
    ) -> io::Result<T> {
        let raw = self.bw(args, input)?;
        serde_json::from_str(raw.trim()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn list_names(&self, kind: &str) -> io::Result<HashMap<String, String>> {
        let named: Vec<BwNamed> = self.bw_json(&["--raw", "list", kind], None)?;
        Ok(named
            .into_iter()
            .filter_map(|n| n.id.map(|id| (id, n.name)))
            .collect())
    }

    fn write_err(&self, e: impl std::fmt::Display) -> SyncError {
        SyncError::StoreWrite(format!("{}: {}", self.name, e))
    }

    /// Encode an object body the way `bw create`/`bw edit` expect it
    fn encode<T: Serialize>(body: &T) -> Result<String> {
        Ok(BASE64.encode(serde_json::to_vec(body)?))
    }

    /// Refresh the client cache after a mutation; the mutation itself stands
    fn refresh(&self) {
        if let Err(e) = self.bw(&["sync"], None) {
            tracing::warn!("bw sync after change failed: {}", e);
        }
    }

    fn ensure_folder(
        &self,
        catalog: &mut Catalog,
        record: &CanonicalRecord,
    ) -> Result<Option<String>> {
        if record.path.is_empty() {
            return Ok(None);
        }
        let folder = record.folder();
        if let Some(id) = Catalog::id_of(&catalog.folders, &folder) {
            return Ok(Some(id));
        }

        let body = Self::encode(&serde_json::json!({ "name": folder }))?;
        let created: BwNamed = self
            .bw_json(&["--raw", "create", "folder"], Some(&body))
            .map_err(|e| self.write_err(e))?;
        let id = created
            .id
            .ok_or_else(|| self.write_err(format!("folder {} created without id", folder)))?;
        tracing::info!("Created bitwarden folder {}", folder);
        catalog.folders.insert(id.clone(), created.name);
        Ok(Some(id))
    }

    fn organization_id(
        &self,
        catalog: &Catalog,
        record: &CanonicalRecord,
    ) -> Result<Option<String>> {
        match &record.organization {
            None => Ok(None),
            Some(org) => Catalog::id_of(&catalog.organizations, org)
                .map(Some)
                .ok_or_else(|| self.write_err(format!("unknown organization {}", org))),
        }
    }

    fn ensure_collections(
        &self,
        catalog: &mut Catalog,
        record: &CanonicalRecord,
        org_id: Option<&str>,
    ) -> Result<Option<Vec<String>>> {
        let Some(org_id) = org_id else {
            return Ok(None);
        };
        if record.collections.is_empty() {
            return Ok(None);
        }

        let mut ids = Vec::with_capacity(record.collections.len());
        for collection in &record.collections {
            if let Some(id) = Catalog::id_of(&catalog.collections, collection) {
                ids.push(id);
                continue;
            }
            let body = Self::encode(&serde_json::json!({
                "organizationId": org_id,
                "name": collection,
            }))?;
            let created: BwNamed = self
                .bw_json(
                    &["--raw", "create", "org-collection", "--organizationid", org_id],
                    Some(&body),
                )
                .map_err(|e| self.write_err(e))?;
            let id = created.id.ok_or_else(|| {
                self.write_err(format!("collection {} created without id", collection))
            })?;
            catalog.collections.insert(id.clone(), created.name);
            ids.push(id);
        }
        Ok(Some(ids))
    }

    /// Catalog position of the listed item holding `current`
    fn item_index(&self, catalog: &Catalog, current: &CanonicalRecord) -> Result<usize> {
        let listed = catalog.items.iter().map(|(record, _)| record);
        locate_existing(&self.name, &self.resolver, listed, current)
    }
}

impl StoreAdapter for BitwardenStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_all(&self) -> Result<Vec<CanonicalRecord>> {
        let read_err = |e: io::Error| SyncError::read(&self.name, e);

        let mut catalog = Catalog {
            folders: self.list_names("folders").map_err(read_err)?,
            organizations: self.list_names("organizations").map_err(read_err)?,
            collections: self.list_names("collections").map_err(read_err)?,
            items: Vec::new(),
        };
        let items: Vec<BwItem> = self
            .bw_json(&["--raw", "list", "items"], None)
            .map_err(read_err)?;

        let mut records = Vec::with_capacity(items.len());
        for item in &items {
            if item.kind != LOGIN_TYPE {
                tracing::debug!("Skipping non-login item {}", item.name);
                continue;
            }
            let record = catalog.canonical(item);
            if let Some(id) = &item.id {
                catalog.items.push((record.clone(), id.clone()));
            }
            records.push(record);
        }

        tracing::debug!("Listed {} bitwarden login items", records.len());
        *self.catalog.lock() = catalog;
        Ok(records)
    }

    fn create(&self, record: &CanonicalRecord) -> Result<()> {
        record.validate()?;

        let mut catalog = self.catalog.lock();
        let listed = catalog.items.iter().map(|(listed, _)| listed);
        if locate(&self.name, &self.resolver, listed, record)?.is_some() {
            let key = self.resolver.key(record);
            return Err(self.write_err(format!(
                "{} already exists",
                self.resolver.render(&key)
            )));
        }

        let folder_id = self.ensure_folder(&mut catalog, record)?;
        let org_id = self.organization_id(&catalog, record)?;
        let collection_ids = self.ensure_collections(&mut catalog, record, org_id.as_deref())?;

        let mut item = BwItem {
            id: None,
            kind: LOGIN_TYPE,
            name: record.title.clone(),
            notes: record.notes.clone(),
            favorite: record.favorite,
            folder_id,
            organization_id: org_id,
            collection_ids,
            fields: None,
            login: Some(BwLogin {
                username: Some(record.username.clone()),
                password: Some(record.secret.clone()),
                totp: record.totp.clone(),
                uris: Some(
                    record
                        .url
                        .iter()
                        .map(|url| BwUri {
                            uri: Some(url.clone()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                extra: Default::default(),
            }),
            revision_date: None,
            extra: Default::default(),
        };
        item.set_sync_flag(record.sync_enabled);

        let body = Self::encode(&item)?;
        let created: BwItem = self
            .bw_json(&["--raw", "create", "item"], Some(&body))
            .map_err(|e| self.write_err(e))?;
        if let Some(id) = created.id {
            catalog.items.push((record.clone(), id));
        }
        drop(catalog);

        self.refresh();
        Ok(())
    }

    fn update(&self, current: &CanonicalRecord, record: &CanonicalRecord) -> Result<()> {
        record.validate()?;

        let mut catalog = self.catalog.lock();
        let idx = self.item_index(&catalog, current)?;
        let id = catalog.items[idx].1.clone();
        let key = self.resolver.render(&self.resolver.key(current));
        let mut item: BwItem = self
            .bw_json(&["--raw", "get", "item", &id], None)
            .map_err(|e| self.write_err(e))?;
        let stored = catalog.canonical(&item);

        if record.organization != stored.organization {
            return Err(SyncError::Unsupported(format!(
                "{}: organization update of {}",
                self.name, key
            )));
        }
        if record.collections != stored.collections {
            return Err(SyncError::Unsupported(format!(
                "{}: collections update of {}",
                self.name, key
            )));
        }

        if record.path != stored.path {
            item.folder_id = self.ensure_folder(&mut catalog, record)?;
        }
        item.name = record.title.clone();
        item.notes = record.notes.clone();
        item.favorite = record.favorite;
        if record.sync_enabled != stored.sync_enabled {
            item.set_sync_flag(record.sync_enabled);
        }

        let login = item.login.get_or_insert_with(BwLogin::default);
        login.username = Some(record.username.clone());
        login.password = Some(record.secret.clone());
        login.totp = record.totp.clone();
        if record.url != stored.url {
            // only the first uri is synchronized; replace it, keep the rest
            let mut uris = login.uris.take().unwrap_or_default();
            match (&record.url, uris.is_empty()) {
                (Some(url), true) => uris.push(BwUri {
                    uri: Some(url.clone()),
                    ..Default::default()
                }),
                (Some(url), false) => uris[0].uri = Some(url.clone()),
                (None, false) => {
                    uris.remove(0);
                }
                (None, true) => {}
            }
            login.uris = Some(uris);
        }

        item.id = None;
        item.revision_date = None;

        let body = Self::encode(&item)?;
        self.bw(&["--raw", "edit", "item", &id], Some(&body))
            .map_err(|e| self.write_err(e))?;
        catalog.items[idx].0 = record.clone();
        drop(catalog);

        self.refresh();
        Ok(())
    }

    fn delete(&self, current: &CanonicalRecord) -> Result<()> {
        let mut catalog = self.catalog.lock();
        let idx = self.item_index(&catalog, current)?;
        let id = catalog.items[idx].1.clone();
        self.bw(&["delete", "item", &id], None)
            .map_err(|e| self.write_err(e))?;
        catalog.items.remove(idx);
        drop(catalog);

        self.refresh();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Scripted `bw`: answers by the first non-flag arguments and records calls
    #[derive(Default)]
    struct FakeBw {
        responses: Mutex<HashMap<String, String>>,
        calls: Mutex<Vec<(String, Vec<String>, Option<String>)>>,
        argv: Mutex<Vec<Vec<String>>>,
    }

    impl FakeBw {
        fn respond(&self, command: &str, output: serde_json::Value) {
            self.responses
                .lock()
                .insert(command.to_string(), output.to_string());
        }

        fn respond_raw(&self, command: &str, output: &str) {
            self.responses
                .lock()
                .insert(command.to_string(), output.to_string());
        }

        fn commands(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(c, _, _)| c.clone()).collect()
        }

        fn args_of(&self, command: &str) -> Option<Vec<String>> {
            let calls = self.calls.lock();
            let argv = self.argv.lock();
            calls
                .iter()
                .zip(argv.iter())
                .find(|((c, _, _), _)| c == command)
                .map(|(_, args)| args.clone())
        }

        fn input_of(&self, command: &str) -> Option<serde_json::Value> {
            self.calls
                .lock()
                .iter()
                .find(|(c, _, _)| c == command)
                .and_then(|(_, _, input)| input.clone())
                .map(|b64| serde_json::from_slice(&BASE64.decode(b64).unwrap()).unwrap())
        }
    }

    impl CommandRunner for FakeBw {
        fn run(
            &self,
            args: &[&str],
            env: &[(&str, &str)],
            input: Option<&str>,
        ) -> io::Result<String> {
            let command = args
                .iter()
                .filter(|a| !a.starts_with('-'))
                .take(2)
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().push((
                command.clone(),
                env.iter().map(|(k, _)| k.to_string()).collect(),
                input.map(String::from),
            ));
            self.argv
                .lock()
                .push(args.iter().map(|a| a.to_string()).collect());

            let silent = matches!(command.as_str(), "sync" | "delete item" | "edit item");
            self.responses
                .lock()
                .get(&command)
                .cloned()
                .or_else(|| silent.then(String::new))
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::Other, format!("unexpected {}", command))
                })
        }
    }

    fn fake() -> Arc<FakeBw> {
        let bw = Arc::new(FakeBw::default());
        bw.respond("status", json!({"status": "unlocked", "userId": "42"}));
        bw.respond(
            "list folders",
            json!([{"id": "f1", "name": "Web/Banking"}, {"id": null, "name": "No Folder"}]),
        );
        bw.respond("list organizations", json!([{"id": "o1", "name": "Home"}]));
        bw.respond(
            "list collections",
            json!([{"id": "c1", "name": "Family", "organizationId": "o1"}]),
        );
        bw.respond(
            "list items",
            json!([
                {
                    "id": "i1",
                    "type": 1,
                    "name": "Bank",
                    "notes": null,
                    "favorite": true,
                    "folderId": "f1",
                    "organizationId": "o1",
                    "collectionIds": ["c1"],
                    "fields": [{"name": "pws_sync", "value": "True", "type": 0}],
                    "login": {
                        "username": "alice",
                        "password": "pw",
                        "totp": null,
                        "uris": [{"match": null, "uri": "https://bank.example"}]
                    },
                    "revisionDate": "2021-09-01T10:00:00.000Z",
                    "reprompt": 0
                },
                {"id": "n1", "type": 2, "name": "Note", "secureNote": {"type": 0}}
            ]),
        );
        bw
    }

    fn connect(bw: &Arc<FakeBw>) -> BitwardenStore {
        BitwardenStore::connect(
            bw.clone(),
            &BitwardenCredentials::default(),
            IdentityResolver::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_list_canonicalizes_login_items() {
        let bw = fake();
        let store = connect(&bw);
        let records = store.list_all().unwrap();

        assert_eq!(records.len(), 1);
        let bank = &records[0];
        assert_eq!(bank.path, vec!["Web", "Banking"]);
        assert_eq!(bank.title, "Bank");
        assert_eq!(bank.url.as_deref(), Some("https://bank.example"));
        assert_eq!(bank.organization.as_deref(), Some("Home"));
        assert!(bank.collections.contains("Family"));
        assert!(bank.favorite);
        assert!(bank.sync_enabled);
        assert!(bank.last_modified.is_some());
    }

    #[test]
    fn test_locked_vault_is_unlocked_with_password_env() {
        let bw = fake();
        bw.respond("status", json!({"status": "locked", "userId": "42"}));
        bw.respond_raw("unlock", "session-token\n");
        let credentials = BitwardenCredentials {
            client_id: None,
            client_secret: None,
            master_password: Some("master".to_string()),
        };
        let store =
            BitwardenStore::connect(bw.clone(), &credentials, IdentityResolver::default()).unwrap();

        assert_eq!(store.session.as_deref(), Some("session-token"));
        let calls = bw.calls.lock();
        let unlock = calls.iter().find(|(c, _, _)| c == "unlock").unwrap();
        assert_eq!(unlock.1, vec!["BW_MASTER_PASSWORD".to_string()]);
        let sync = calls.iter().find(|(c, _, _)| c == "sync").unwrap();
        assert_eq!(sync.1, vec!["BW_SESSION".to_string()]);
    }

    #[test]
    fn test_foreign_session_logout_failure_is_not_fatal() {
        let bw = fake();
        bw.respond_raw("login", "You are logged in!");
        bw.respond_raw("unlock", "session-token");
        let credentials = BitwardenCredentials {
            client_id: Some("user.99".to_string()),
            client_secret: Some("secret".to_string()),
            master_password: Some("master".to_string()),
        };

        // no scripted answer for lock/logout: both calls fail
        let store =
            BitwardenStore::connect(bw.clone(), &credentials, IdentityResolver::default()).unwrap();

        assert_eq!(store.session.as_deref(), Some("session-token"));
        assert_eq!(
            bw.commands(),
            vec!["status", "lock", "logout", "login", "unlock", "sync"]
        );
    }

    #[test]
    fn test_locked_without_password_is_config_error() {
        let bw = fake();
        bw.respond("status", json!({"status": "locked"}));
        let err = BitwardenStore::connect(
            bw,
            &BitwardenCredentials::default(),
            IdentityResolver::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_create_builds_item_and_folder() {
        let bw = fake();
        bw.respond("create folder", json!({"id": "f2", "name": "Mail"}));
        bw.respond("create item", json!({"id": "i2", "type": 1, "name": "Inbox"}));
        let store = connect(&bw);
        store.list_all().unwrap();

        let record =
            CanonicalRecord::new(["Mail"], "Inbox", "carol", "pw").with_url("https://mail");
        store.create(&record).unwrap();

        let body = bw.input_of("create item").unwrap();
        assert_eq!(body["folderId"], "f2");
        assert_eq!(body["login"]["username"], "carol");
        assert_eq!(body["login"]["uris"][0]["uri"], "https://mail");
        assert_eq!(body["fields"][0]["name"], PWS_SYNC);
        assert_eq!(bw.commands().last().map(String::as_str), Some("sync"));
    }

    #[test]
    fn test_update_edits_item_by_key() {
        let bw = fake();
        let store = connect(&bw);
        let records = store.list_all().unwrap();
        let items: serde_json::Value =
            serde_json::from_str(&bw.responses.lock()["list items"]).unwrap();
        bw.respond("get item", items[0].clone());

        let mut changed = records[0].clone();
        changed.secret = "new-pw".to_string();
        store.update(&records[0], &changed).unwrap();

        let body = bw.input_of("edit item").unwrap();
        assert_eq!(body["login"]["password"], "new-pw");
        assert_eq!(body["reprompt"], 0);
        assert!(body.get("id").is_none());
    }

    #[test]
    fn test_collection_update_unsupported() {
        let bw = fake();
        let store = connect(&bw);
        let records = store.list_all().unwrap();
        let items: serde_json::Value =
            serde_json::from_str(&bw.responses.lock()["list items"]).unwrap();
        bw.respond("get item", items[0].clone());

        let changed = records[0].clone().with_collections(["Work"]);
        let err = store.update(&records[0], &changed).unwrap_err();
        assert!(matches!(err, SyncError::Unsupported(_)));
        assert!(!bw.commands().contains(&"edit item".to_string()));
    }

    #[test]
    fn test_delete_unknown_key_is_not_found() {
        let bw = fake();
        let store = connect(&bw);
        store.list_all().unwrap();
        let ghost = CanonicalRecord::new(["Old"], "Unused", "dave", "pw");
        let err = store.delete(&ghost).unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[test]
    fn test_unflagged_twin_keeps_its_item() {
        let bw = fake();
        let mut items: serde_json::Value =
            serde_json::from_str(&bw.responses.lock()["list items"]).unwrap();
        let mut manual = items[0].clone();
        manual["id"] = json!("i0");
        manual["fields"] = json!([]);
        manual["login"]["username"] = json!("manual");
        if let Some(list) = items.as_array_mut() {
            list.insert(0, manual);
        }
        bw.respond("list items", items);

        let store = connect(&bw);
        let records = store.list_all().unwrap();
        let flagged = records.iter().find(|r| r.sync_enabled).unwrap();

        store.delete(flagged).unwrap();
        assert_eq!(
            bw.args_of("delete item"),
            Some(vec!["delete".to_string(), "item".to_string(), "i1".to_string()])
        );

        // the flagged item is gone, so nothing left holds a flagged Bank
        assert!(matches!(
            store.delete(flagged).unwrap_err(),
            SyncError::NotFound(_)
        ));
        let deletes = bw.commands().iter().filter(|c| *c == "delete item").count();
        assert_eq!(deletes, 1);
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let credentials = BitwardenCredentials {
            client_id: Some("user.42".to_string()),
            client_secret: Some("s3cret".to_string()),
            master_password: Some("master".to_string()),
        };
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("master\""));
        assert!(rendered.contains("user.42"));
    }
}
