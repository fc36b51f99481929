//! File based storage for workflow users.
//!
//! Every user owns a folder named after the hash of their e-mail (the *uid*).
//! Submissions are kept as append-only *dated files*
//! `<endpoint>_<YYYYMMDD>_<HHMMSS>.json`, and `<endpoint>.latest` names the
//! most recent one. Endpoints starting with `_` belong to the system:
//! `_email` holds the registered address and `_state` the workflow state.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hymie_types::{IndexEntry, StateOrigin, StateRecord, StorageConfig, StoredEntry, Timestamp};
use hymie_util::resolve_against;
use indexmap::IndexMap;
use pbkdf2::pbkdf2_hmac;
use serde_json::{Map, Value, json};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const EMAIL_ENDPOINT: &str = "_email";
pub const STATE_ENDPOINT: &str = "_state";
pub const UPLOADS_FOLDER: &str = "uploads";
/// Origin recorded for the state assigned at registration.
pub const REGISTER_ORIGIN: &str = "register";

const PROBE_FILE: &str = "ok";
const POINTER_EXTENSION: &str = "latest";
const DATED_EXTENSION: &str = "json";
/// Memoized hashes kept before the oldest is evicted.
const HASH_CACHE_CAPACITY: usize = 512;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("e-mail address already registered: {email}")]
    AlreadyRegistered { email: String },
    #[error("unknown user: {uid}")]
    UnknownUser { uid: String },
    #[error("no data stored for {endpoint}")]
    NotFound { endpoint: String },
    #[error("invalid name: '{0}'")]
    InvalidName(String),
    #[error("unknown upload: {0}")]
    UnknownUpload(String),
}

impl StorageError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Name of the dated file for an endpoint at a given time.
pub fn dated_file_name(endpoint: &str, timestamp: Timestamp) -> String {
    format!("{endpoint}_{timestamp}.{DATED_EXTENSION}")
}

/// Splits a dated file stem such as `intro_20200314_092653` into endpoint and timestamp.
pub fn split_dated_stem(stem: &str) -> Option<(&str, Timestamp)> {
    let (rest, time) = stem.rsplit_once('_')?;
    let (endpoint, date) = rest.rsplit_once('_')?;
    if endpoint.is_empty() {
        return None;
    }
    let timestamp = format!("{date}_{time}").parse().ok()?;
    Some((endpoint, timestamp))
}

fn validate_endpoint_name(endpoint: &str) -> StorageResult<()> {
    let valid = !endpoint.is_empty()
        && endpoint
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '_' | '-'));
    if valid { Ok(()) } else { Err(StorageError::InvalidName(endpoint.to_string())) }
}

/// Replaces every character that is not safe in a file name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '_' | '-') {
                character
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() { "upload".to_string() } else { sanitized.to_string() }
}

fn write_atomic(path: &Path, content: &[u8]) -> StorageResult<()> {
    let temporary_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|extension| extension.to_str()).unwrap_or("tmp")
    ));
    fs::write(&temporary_path, content).map_err(StorageError::io(&temporary_path))?;
    fs::rename(&temporary_path, path).map_err(StorageError::io(path))?;
    Ok(())
}

/// Storage rooted at the configured folder.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    uploads: PathBuf,
    salt: String,
    iterations: u32,
    hashes: Mutex<IndexMap<String, String>>,
}

impl Storage {
    /// Opens (creating when needed) the storage described by `config`.
    ///
    /// A relative storage path is resolved against `app_root`. A probe file is
    /// written to the root and to the uploads folder to fail early when the
    /// process cannot write there.
    pub fn open(config: &StorageConfig, app_root: &Path) -> StorageResult<Self> {
        let root = resolve_against(app_root, &config.path);
        let uploads = root.join(UPLOADS_FOLDER);
        for folder in [&root, &uploads] {
            fs::create_dir_all(folder).map_err(StorageError::io(folder))?;
            let probe = folder.join(PROBE_FILE);
            fs::write(&probe, b"").map_err(StorageError::io(&probe))?;
        }
        info!(path = %root.display(), "storage ready");
        Ok(Self {
            root,
            uploads,
            salt: config.salt.clone(),
            iterations: config.hash_iterations.max(1),
            hashes: Mutex::new(IndexMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hex encoded PBKDF2-HMAC-SHA256 of `value` with the configured salt.
    pub fn hash_for(&self, value: &str) -> String {
        if let Some(hash) = self.hashes.lock().expect("hash cache lock poisoned").get(value) {
            return hash.clone();
        }
        let mut output = [0u8; 32];
        pbkdf2_hmac::<Sha256>(value.as_bytes(), self.salt.as_bytes(), self.iterations, &mut output);
        let hash = hex::encode(output);
        let mut hashes = self.hashes.lock().expect("hash cache lock poisoned");
        if hashes.len() >= HASH_CACHE_CAPACITY {
            hashes.shift_remove_index(0);
        }
        hashes.insert(value.to_string(), hash.clone());
        hash
    }

    fn user_dir(&self, uid: &str) -> StorageResult<PathBuf> {
        if uid.is_empty() || !uid.chars().all(|character| character.is_ascii_hexdigit()) {
            return Err(StorageError::UnknownUser { uid: uid.to_string() });
        }
        let folder = self.root.join(uid);
        if folder.is_dir() {
            Ok(folder)
        } else {
            Err(StorageError::UnknownUser { uid: uid.to_string() })
        }
    }

    pub fn is_registered(&self, email: &str) -> bool {
        self.root.join(self.hash_for(email)).is_dir()
    }

    /// Registers an address and assigns `first_state`. Returns the uid.
    pub fn register(&self, email: &str, first_state: &str) -> StorageResult<String> {
        let uid = self.hash_for(email);
        let folder = self.root.join(&uid);
        match fs::create_dir(&folder) {
            Ok(()) => {}
            Err(source) if source.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyRegistered { email: email.to_string() });
            }
            Err(source) => return Err(StorageError::Io { path: folder, source }),
        }

        self.user_store(&uid, EMAIL_ENDPOINT, json_object(json!({ "email": email })))?;
        let origin = StateOrigin::new(REGISTER_ORIGIN, Timestamp::now());
        self.user_store(&uid, STATE_ENDPOINT, state_content(first_state, &origin))?;
        info!(uid = %uid, state = first_state, "registered user");
        Ok(uid)
    }

    /// Every registered uid, sorted.
    pub fn uids(&self) -> StorageResult<Vec<String>> {
        let mut uids = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(StorageError::io(&self.root))? {
            let entry = entry.map_err(StorageError::io(&self.root))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != UPLOADS_FOLDER {
                uids.push(name);
            }
        }
        uids.sort();
        Ok(uids)
    }

    pub fn user_email(&self, uid: &str) -> StorageResult<String> {
        let entry = self.user_retrieve(uid, EMAIL_ENDPOINT)?;
        match entry.content.get("email") {
            Some(Value::String(email)) => Ok(email.clone()),
            _ => Err(StorageError::Corrupt {
                path: self.root.join(uid),
                reason: "missing e-mail".to_string(),
            }),
        }
    }

    /// Current state of a user, with the submission that produced it.
    pub fn user_state(&self, uid: &str) -> StorageResult<StateRecord> {
        let entry = self.user_retrieve(uid, STATE_ENDPOINT)?;
        let Some(Value::String(state)) = entry.content.get("state") else {
            return Err(StorageError::Corrupt {
                path: self.root.join(uid),
                reason: "missing state".to_string(),
            });
        };

        let origin = match entry.content.get("origin") {
            Some(origin) => serde_json::from_value::<StateOrigin>(origin.clone()).ok(),
            None => self.legacy_origin(uid, entry.timestamp)?,
        };

        Ok(StateRecord {
            state: state.clone(),
            timestamp: entry.timestamp,
            origin,
        })
    }

    /// State files written before origins were recorded: the origin is the
    /// previous state at the current timestamp.
    fn legacy_origin(&self, uid: &str, timestamp: Timestamp) -> StorageResult<Option<StateOrigin>> {
        let history = self.user_state_history(uid)?;
        let position = history.iter().position(|(at, _)| *at == timestamp);
        Ok(position
            .filter(|index| *index > 0)
            .map(|index| StateOrigin::new(history[index - 1].1.clone(), timestamp)))
    }

    /// Stores `data` under `endpoint` and makes it the latest entry.
    pub fn user_store(&self, uid: &str, endpoint: &str, data: Map<String, Value>) -> StorageResult<StoredEntry> {
        validate_endpoint_name(endpoint)?;
        let folder = self.user_dir(uid)?;
        let (timestamp, file_name) = self.write_dated(&folder, endpoint, &data)?;
        write_atomic(&pointer_path(&folder, endpoint), file_name.as_bytes())?;
        debug!(uid, endpoint, %timestamp, "stored entry");
        Ok(StoredEntry {
            endpoint: endpoint.to_string(),
            timestamp,
            content: data,
        })
    }

    fn write_dated(&self, folder: &Path, endpoint: &str, data: &Map<String, Value>) -> StorageResult<(Timestamp, String)> {
        let serialized = serde_json::to_vec(data).map_err(|source| StorageError::Json {
            path: folder.to_path_buf(),
            source,
        })?;

        let mut timestamp = Timestamp::now();
        if let Some(latest) = read_pointer(folder, endpoint)?
            .as_deref()
            .and_then(|name| name.strip_suffix(".json"))
            .and_then(split_dated_stem)
            .map(|(_, at)| at)
            && latest >= timestamp
        {
            timestamp = latest.next_second();
        }

        loop {
            let file_name = dated_file_name(endpoint, timestamp);
            let path = folder.join(&file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&serialized).map_err(StorageError::io(&path))?;
                    return Ok((timestamp, file_name));
                }
                Err(source) if source.kind() == ErrorKind::AlreadyExists => timestamp = timestamp.next_second(),
                Err(source) => return Err(StorageError::Io { path, source }),
            }
        }
    }

    /// Latest entry of an endpoint.
    pub fn user_retrieve(&self, uid: &str, endpoint: &str) -> StorageResult<StoredEntry> {
        validate_endpoint_name(endpoint)?;
        let folder = self.user_dir(uid)?;
        let Some(file_name) = read_pointer(&folder, endpoint)? else {
            return Err(StorageError::NotFound {
                endpoint: endpoint.to_string(),
            });
        };
        read_entry(&folder.join(file_name))
    }

    /// Entry of an endpoint stored at a given time.
    pub fn user_retrieve_at(&self, uid: &str, endpoint: &str, timestamp: Timestamp) -> StorageResult<StoredEntry> {
        validate_endpoint_name(endpoint)?;
        let folder = self.user_dir(uid)?;
        let path = folder.join(dated_file_name(endpoint, timestamp));
        if !path.is_file() {
            return Err(StorageError::NotFound {
                endpoint: endpoint.to_string(),
            });
        }
        read_entry(&path)
    }

    /// Latest content of every non-system endpoint, keyed by endpoint.
    pub fn user_retrieve_all_current(&self, uid: &str, skip: &[&str]) -> StorageResult<Map<String, Value>> {
        let folder = self.user_dir(uid)?;
        let mut current = Map::new();
        for name in file_names(&folder)? {
            let Some(endpoint) = name.strip_suffix(&format!(".{POINTER_EXTENSION}")) else {
                continue;
            };
            if endpoint.starts_with('_') || skip.contains(&endpoint) {
                continue;
            }
            let entry = self.user_retrieve(uid, endpoint)?;
            current.insert(endpoint.to_string(), Value::Object(entry.content));
        }
        Ok(current)
    }

    /// Every non-system dated entry, oldest first.
    pub fn user_index(&self, uid: &str) -> StorageResult<Vec<IndexEntry>> {
        let folder = self.user_dir(uid)?;
        let mut index: Vec<IndexEntry> = file_names(&folder)?
            .iter()
            .filter_map(|name| name.strip_suffix(".json"))
            .filter(|stem| !stem.starts_with('_'))
            .filter_map(split_dated_stem)
            .map(|(endpoint, timestamp)| IndexEntry {
                timestamp,
                endpoint: endpoint.to_string(),
            })
            .collect();
        index.sort();
        Ok(index)
    }

    /// Every state the user went through, oldest first.
    pub fn user_state_history(&self, uid: &str) -> StorageResult<Vec<(Timestamp, String)>> {
        let folder = self.user_dir(uid)?;
        let mut history = Vec::new();
        for name in file_names(&folder)? {
            let Some((endpoint, timestamp)) = name.strip_suffix(".json").and_then(split_dated_stem) else {
                continue;
            };
            if endpoint != STATE_ENDPOINT {
                continue;
            }
            let entry = read_entry(&folder.join(&name))?;
            if let Some(Value::String(state)) = entry.content.get("state") {
                history.push((timestamp, state.clone()));
            }
        }
        history.sort();
        Ok(history)
    }

    /// Hash of the current state, required by links that move a user forward.
    pub fn statehash_for(&self, uid: &str) -> StorageResult<String> {
        let folder = self.user_dir(uid)?;
        let Some(file_name) = read_pointer(&folder, STATE_ENDPOINT)? else {
            return Err(StorageError::NotFound {
                endpoint: STATE_ENDPOINT.to_string(),
            });
        };
        Ok(self.state_hash(uid, &file_name))
    }

    fn state_hash(&self, uid: &str, state_file_name: &str) -> String {
        let stem = state_file_name.strip_suffix(".json").unwrap_or(state_file_name);
        self.hash_for(&format!("{uid}{stem}"))
    }

    /// Starts a state transition.
    ///
    /// With `new_state` the new `_state` entry is written right away but only
    /// becomes current on [`PendingTransition::commit`]. Without it the state is
    /// left as is and the transition only carries the current state hash.
    pub fn begin_transition(&self, uid: &str, new_state: Option<&str>, origin: StateOrigin) -> StorageResult<PendingTransition> {
        let folder = self.user_dir(uid)?;
        let Some(state) = new_state else {
            return Ok(PendingTransition {
                folder,
                pending: None,
                hcsf: self.statehash_for(uid)?,
                committed: false,
            });
        };

        let (_, file_name) = self.write_dated(&folder, STATE_ENDPOINT, &state_content(state, &origin))?;
        let hcsf = self.state_hash(uid, &file_name);
        debug!(uid, state, file = %file_name, "transition pending");
        Ok(PendingTransition {
            folder,
            pending: Some(file_name),
            hcsf,
            committed: false,
        })
    }

    /// Saves an uploaded file and returns its id.
    pub fn save_upload(&self, original_name: &str, bytes: &[u8]) -> StorageResult<String> {
        let file_id = format!("{}_{}", Uuid::new_v4().simple(), sanitize_file_name(original_name));
        let path = self.uploads.join(&file_id);
        fs::write(&path, bytes).map_err(StorageError::io(&path))?;
        info!(file = %file_id, size = bytes.len(), "saved upload");
        Ok(file_id)
    }

    /// Location of an uploaded file.
    pub fn upload_path(&self, file_id: &str) -> StorageResult<PathBuf> {
        if file_id.is_empty() || file_id.contains(['/', '\\']) || file_id.starts_with('.') || file_id == PROBE_FILE {
            return Err(StorageError::InvalidName(file_id.to_string()));
        }
        let path = self.uploads.join(file_id);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StorageError::UnknownUpload(file_id.to_string()))
        }
    }
}

/// A state change that is undone unless committed.
#[derive(Debug)]
pub struct PendingTransition {
    folder: PathBuf,
    pending: Option<String>,
    hcsf: String,
    committed: bool,
}

impl PendingTransition {
    /// State hash that is valid once the transition is committed.
    pub fn hcsf(&self) -> &str {
        &self.hcsf
    }

    pub fn commit(mut self) -> StorageResult<()> {
        if let Some(file_name) = &self.pending {
            write_atomic(&pointer_path(&self.folder, STATE_ENDPOINT), file_name.as_bytes())?;
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingTransition {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(file_name) = &self.pending {
            let path = self.folder.join(file_name);
            match fs::remove_file(&path) {
                Ok(()) => debug!(file = %path.display(), "transition rolled back"),
                Err(error) => warn!(file = %path.display(), %error, "could not roll back transition"),
            }
        }
    }
}

fn state_content(state: &str, origin: &StateOrigin) -> Map<String, Value> {
    json_object(json!({ "state": state, "origin": origin }))
}

fn json_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn pointer_path(folder: &Path, endpoint: &str) -> PathBuf {
    folder.join(format!("{endpoint}.{POINTER_EXTENSION}"))
}

fn read_pointer(folder: &Path, endpoint: &str) -> StorageResult<Option<String>> {
    let path = pointer_path(folder, endpoint);
    match fs::read_to_string(&path) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(source) if source.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Io { path, source }),
    }
}

fn read_entry(path: &Path) -> StorageResult<StoredEntry> {
    let Some((endpoint, timestamp)) = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(split_dated_stem)
    else {
        return Err(StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: "not a dated file".to_string(),
        });
    };
    let raw = fs::read(path).map_err(StorageError::io(path))?;
    let content = serde_json::from_slice::<Map<String, Value>>(&raw).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(StoredEntry {
        endpoint: endpoint.to_string(),
        timestamp,
        content,
    })
}

fn file_names(folder: &Path) -> StorageResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(folder).map_err(StorageError::io(folder))? {
        let entry = entry.map_err(StorageError::io(folder))?;
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn open() -> (TempDir, Storage) {
        let folder = tempdir().unwrap();
        let config = StorageConfig {
            path: PathBuf::from("data"),
            salt: "pepper".to_string(),
            hash_iterations: 1,
        };
        let storage = Storage::open(&config, folder.path()).unwrap();
        (folder, storage)
    }

    fn data(value: Value) -> Map<String, Value> {
        json_object(value)
    }

    #[test]
    fn open_creates_folders_with_probes() {
        let (folder, storage) = open();
        assert_eq!(storage.root(), folder.path().join("data"));
        assert!(folder.path().join("data/ok").is_file());
        assert!(folder.path().join("data/uploads/ok").is_file());
    }

    #[test]
    fn hashes_are_stable_hex() {
        let (_folder, storage) = open();
        let hash = storage.hash_for("jane@example.com");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, storage.hash_for("jane@example.com"));
        assert_ne!(hash, storage.hash_for("john@example.com"));
    }

    #[test]
    fn hash_memo_is_bounded() {
        let (_folder, storage) = open();
        let first = storage.hash_for("user0@example.com");
        for index in 1..HASH_CACHE_CAPACITY + 10 {
            storage.hash_for(&format!("user{index}@example.com"));
        }
        let hashes = storage.hashes.lock().unwrap();
        assert_eq!(hashes.len(), HASH_CACHE_CAPACITY);
        assert!(!hashes.contains_key("user0@example.com"));
        drop(hashes);
        assert_eq!(storage.hash_for("user0@example.com"), first);
    }

    #[test]
    fn dated_stems_split_at_the_timestamp() {
        let (endpoint, timestamp) = split_dated_stem("trip_request_20200314_092653").unwrap();
        assert_eq!(endpoint, "trip_request");
        assert_eq!(timestamp.to_string(), "20200314_092653");
        assert!(split_dated_stem("intro").is_none());
        assert!(split_dated_stem("_20200314_092653").is_none());
    }

    #[test]
    fn register_sets_email_and_first_state() {
        let (_folder, storage) = open();
        let uid = storage.register("jane@example.com", "intro").unwrap();
        assert!(storage.is_registered("jane@example.com"));
        assert_eq!(storage.user_email(&uid).unwrap(), "jane@example.com");
        let state = storage.user_state(&uid).unwrap();
        assert_eq!(state.state, "intro");
        assert_eq!(state.origin.unwrap().endpoint, REGISTER_ORIGIN);
        assert_eq!(storage.uids().unwrap(), [uid]);
    }

    #[test]
    fn registering_twice_fails() {
        let (_folder, storage) = open();
        storage.register("jane@example.com", "intro").unwrap();
        let error = storage.register("jane@example.com", "intro").unwrap_err();
        assert!(matches!(error, StorageError::AlreadyRegistered { .. }));
    }

    #[test]
    fn stores_never_reuse_dated_names() {
        let (_folder, storage) = open();
        let uid = storage.register("jane@example.com", "intro").unwrap();
        let first = storage.user_store(&uid, "intro", data(json!({"name": "a"}))).unwrap();
        let second = storage.user_store(&uid, "intro", data(json!({"name": "b"}))).unwrap();
        assert!(second.timestamp > first.timestamp);

        let latest = storage.user_retrieve(&uid, "intro").unwrap();
        assert_eq!(latest.content["name"], "b");
        let older = storage.user_retrieve_at(&uid, "intro", first.timestamp).unwrap();
        assert_eq!(older.content["name"], "a");

        let index = storage.user_index(&uid).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.iter().all(|entry| entry.endpoint == "intro"));
    }

    #[test]
    fn current_contents_skip_system_and_requested_endpoints() {
        let (_folder, storage) = open();
        let uid = storage.register("jane@example.com", "intro").unwrap();
        storage.user_store(&uid, "intro", data(json!({"name": "a"}))).unwrap();
        storage.user_store(&uid, "trip", data(json!({"to": "b"}))).unwrap();
        let current = storage.user_retrieve_all_current(&uid, &["trip"]).unwrap();
        assert_eq!(current.keys().collect::<Vec<_>>(), ["intro"]);
        assert_eq!(current["intro"]["name"], "a");
    }

    #[test]
    fn missing_entries_and_users_are_errors() {
        let (_folder, storage) = open();
        let uid = storage.register("jane@example.com", "intro").unwrap();
        assert!(matches!(storage.user_retrieve(&uid, "trip"), Err(StorageError::NotFound { .. })));
        assert!(matches!(storage.user_email("abc123"), Err(StorageError::UnknownUser { .. })));
        assert!(matches!(storage.user_email("../etc"), Err(StorageError::UnknownUser { .. })));
        assert!(matches!(
            storage.user_store(&uid, "../x", Map::new()),
            Err(StorageError::InvalidName(_))
        ));
    }

    #[test]
    fn committed_transitions_change_the_state_hash() {
        let (_folder, storage) = open();
        let uid = storage.register("jane@example.com", "intro").unwrap();
        let before = storage.statehash_for(&uid).unwrap();

        let transition = storage
            .begin_transition(&uid, Some("review"), StateOrigin::new("intro", Timestamp::now()))
            .unwrap();
        let expected = transition.hcsf().to_string();
        assert_eq!(storage.user_state(&uid).unwrap().state, "intro");
        transition.commit().unwrap();

        let after = storage.statehash_for(&uid).unwrap();
        assert_ne!(before, after);
        assert_eq!(after, expected);
        let state = storage.user_state(&uid).unwrap();
        assert_eq!(state.state, "review");
        assert_eq!(state.origin.unwrap().endpoint, "intro");
        assert_eq!(storage.user_state_history(&uid).unwrap().len(), 2);
    }

    #[test]
    fn dropped_transitions_roll_back() {
        let (_folder, storage) = open();
        let uid = storage.register("jane@example.com", "intro").unwrap();
        let before = storage.statehash_for(&uid).unwrap();
        {
            let _transition = storage
                .begin_transition(&uid, Some("review"), StateOrigin::new("intro", Timestamp::now()))
                .unwrap();
        }
        assert_eq!(storage.statehash_for(&uid).unwrap(), before);
        assert_eq!(storage.user_state(&uid).unwrap().state, "intro");
        assert_eq!(storage.user_state_history(&uid).unwrap().len(), 1);
    }

    #[test]
    fn transitions_without_state_keep_the_current_hash() {
        let (_folder, storage) = open();
        let uid = storage.register("jane@example.com", "intro").unwrap();
        let transition = storage
            .begin_transition(&uid, None, StateOrigin::new("intro", Timestamp::now()))
            .unwrap();
        assert_eq!(transition.hcsf(), storage.statehash_for(&uid).unwrap());
        transition.commit().unwrap();
        assert_eq!(storage.user_state(&uid).unwrap().state, "intro");
    }

    #[test]
    fn legacy_states_derive_origin_from_history() {
        let (_folder, storage) = open();
        let uid = storage.register("jane@example.com", "intro").unwrap();
        let entry = storage.user_store(&uid, STATE_ENDPOINT, data(json!({"state": "review"}))).unwrap();
        let state = storage.user_state(&uid).unwrap();
        assert_eq!(state.origin, Some(StateOrigin::new("intro", entry.timestamp)));
    }

    #[test]
    fn uploads_are_saved_under_random_ids() {
        let (_folder, storage) = open();
        let file_id = storage.save_upload("../../My CV.pdf", b"%PDF").unwrap();
        assert!(file_id.ends_with("_My_CV.pdf"));
        let path = storage.upload_path(&file_id).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"%PDF");
        assert!(matches!(storage.upload_path("../secrets.yaml"), Err(StorageError::InvalidName(_))));
        assert!(matches!(storage.upload_path("ok"), Err(StorageError::InvalidName(_))));
        assert!(matches!(storage.upload_path("missing.pdf"), Err(StorageError::UnknownUpload(_))));
    }
}
