//! Durable storage for the identity store.
//!
//! The on-disk format is a JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "next_id": 3,
//!   "identities": {
//!     "person_1": { "embeddings": [{ "image": "a.jpg", "embedding": [0.1, 0.2] }] }
//!   }
//! }
//! ```
//!
//! Older files that map ids straight to `{"embeddings": [[...]], "image_paths": [...]}`
//! are migrated on load.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PersonIdError;
use crate::identity::{parse_suffix, EmbeddingRecord, Identity, IdentityStore};

/// Current document version.
pub const FORMAT_VERSION: u32 = 1;

/// Loads and saves the whole identity store.
///
/// `load` never fails: missing state is an empty store, and unreadable or
/// malformed state is logged and treated as empty. `save` replaces the
/// previous state entirely.
pub trait StoreBackend: Send {
    fn load(&self) -> IdentityStore;

    fn save(&mut self, store: &IdentityStore) -> Result<(), PersonIdError>;
}

#[derive(Serialize)]
struct DocumentOut<'a> {
    version: u32,
    next_id: u64,
    identities: BTreeMap<&'a str, IdentityOut<'a>>,
}

#[derive(Serialize)]
struct IdentityOut<'a> {
    embeddings: &'a [EmbeddingRecord],
}

#[derive(Deserialize)]
struct IdentityIn {
    #[serde(default)]
    embeddings: Vec<Value>,
    #[serde(default)]
    image_paths: Vec<String>,
}

/// Serializes a store to the current document format.
pub fn encode_document(store: &IdentityStore) -> Result<Vec<u8>, PersonIdError> {
    let doc = DocumentOut {
        version: FORMAT_VERSION,
        next_id: store.next_id(),
        identities: store
            .iter()
            .map(|i| (i.id(), IdentityOut { embeddings: i.records() }))
            .collect(),
    };
    Ok(serde_json::to_vec_pretty(&doc)?)
}

/// Parses a stored document, repairing what it can.
///
/// A document that is not a JSON object yields an empty store. Inside a
/// valid document, bad records (wrong dimension, non-finite values, wrong
/// shape) are dropped one by one, and identities left with no records are
/// dropped. Ids of dropped identities are still never reissued.
///
/// `dim` is the expected embedding dimension; when `None`, the first valid
/// record decides it.
pub fn decode_document(bytes: &[u8], dim: Option<usize>) -> IdentityStore {
    let root = match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(root)) => root,
        Ok(_) => {
            warn!("identity store is not a JSON object, starting empty");
            return IdentityStore::new();
        }
        Err(e) => {
            warn!(error = %e, "identity store is corrupt, starting empty");
            return IdentityStore::new();
        }
    };

    let (next_id, entries) = if root.contains_key("identities") {
        let next_id = root.get("next_id").and_then(Value::as_u64).unwrap_or(0);
        match root.get("identities") {
            Some(Value::Object(m)) => (next_id, m.clone()),
            _ => {
                warn!("identity store has malformed identities, starting empty");
                return IdentityStore::new();
            }
        }
    } else {
        debug!(entries = root.len(), "migrating legacy identity store");
        (0, root)
    };

    let mut dim = dim;
    let mut reserved = 0u64;
    let mut identities = Vec::with_capacity(entries.len());

    for (id, value) in entries {
        if id.is_empty() {
            warn!("dropping identity with empty id");
            continue;
        }
        let raw: IdentityIn = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id = %id, error = %e, "dropping malformed identity");
                reserved = reserved.max(parse_suffix(&id).unwrap_or(0));
                continue;
            }
        };

        let mut records = Vec::with_capacity(raw.embeddings.len());
        for (i, value) in raw.embeddings.into_iter().enumerate() {
            let record = match decode_record(value, raw.image_paths.get(i)) {
                Some(r) => r,
                None => {
                    warn!(id = %id, record = i, "dropping malformed embedding record");
                    continue;
                }
            };
            if record.embedding.is_empty() || record.embedding.iter().any(|x| !x.is_finite()) {
                warn!(id = %id, record = i, "dropping invalid embedding");
                continue;
            }
            let want = *dim.get_or_insert(record.embedding.len());
            if record.embedding.len() != want {
                warn!(
                    id = %id,
                    record = i,
                    expected = want,
                    got = record.embedding.len(),
                    "dropping embedding with wrong dimension"
                );
                continue;
            }
            records.push(record);
        }

        if records.is_empty() {
            warn!(id = %id, "dropping identity without valid embeddings");
            reserved = reserved.max(parse_suffix(&id).unwrap_or(0));
            continue;
        }
        identities.push(Identity::new(id, records));
    }

    IdentityStore::from_parts(identities, next_id, reserved)
}

/// Accepts both the current `{"image", "embedding"}` record and a legacy
/// bare vector paired with its image path by position.
fn decode_record(value: Value, legacy_image: Option<&String>) -> Option<EmbeddingRecord> {
    match value {
        Value::Object(_) => serde_json::from_value(value).ok(),
        Value::Array(_) => serde_json::from_value::<Vec<f32>>(value)
            .ok()
            .map(|embedding| EmbeddingRecord {
                image: legacy_image.cloned().unwrap_or_default(),
                embedding,
            }),
        _ => None,
    }
}

/// Stores the identity store as a JSON file.
///
/// Saves are atomic: the document is written to a temporary file in the
/// same directory, synced, then renamed over the target.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
    dim: Option<usize>,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dim: None,
        }
    }

    /// Sets the embedding dimension enforced while loading. Zero keeps
    /// the dimension inferred from the file.
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = (dim > 0).then_some(dim);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_err(&self, source: std::io::Error) -> PersonIdError {
        PersonIdError::Persist {
            path: self.path.clone(),
            source,
        }
    }
}

impl StoreBackend for JsonFileBackend {
    fn load(&self) -> IdentityStore {
        match std::fs::read(&self.path) {
            Ok(bytes) => decode_document(&bytes, self.dim),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no identity store yet");
                IdentityStore::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "identity store unreadable, starting empty");
                IdentityStore::new()
            }
        }
    }

    fn save(&mut self, store: &IdentityStore) -> Result<(), PersonIdError> {
        let bytes = encode_document(store)?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.persist_err(e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.persist_err(e))?;
        tmp.write_all(&bytes).map_err(|e| self.persist_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.persist_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.persist_err(e.error))?;

        debug!(
            path = %self.path.display(),
            identities = store.len(),
            bytes = bytes.len(),
            "identity store saved"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    store: Option<IdentityStore>,
    saves: usize,
}

/// In-memory [`StoreBackend`]. Data is lost on restart.
///
/// Clones share state, so a test can keep a handle while the tagger owns
/// another one.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing store.
    pub fn with_store(store: IdentityStore) -> Self {
        let backend = Self::new();
        backend.inner.lock().store = Some(store);
        backend
    }

    /// Number of successful saves so far.
    pub fn saves(&self) -> usize {
        self.inner.lock().saves
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self) -> IdentityStore {
        self.inner.lock().store.clone().unwrap_or_default()
    }

    fn save(&mut self, store: &IdentityStore) -> Result<(), PersonIdError> {
        let mut inner = self.inner.lock();
        inner.store = Some(store.clone());
        inner.saves += 1;
        Ok(())
    }
}
