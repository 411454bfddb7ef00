use serde::{Deserialize, Serialize};

use crate::cosine::l2_normalize;
use crate::error::PersonIdError;

/// Prefix of every generated identity id (`person_1`, `person_2`, ...).
pub const ID_PREFIX: &str = "person_";

/// Formats the identity id for counter value `n`.
pub fn format_id(n: u64) -> String {
    format!("{ID_PREFIX}{n}")
}

/// Returns the numeric suffix of a well-formed identity id.
///
/// `person_7` yields 7. Anything else (other prefixes, signs, zero,
/// trailing garbage) yields `None`.
pub fn parse_suffix(id: &str) -> Option<u64> {
    let digits = id.strip_prefix(ID_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&n| n > 0)
}

/// One face an identity was recognized in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Image the face was observed in.
    #[serde(default)]
    pub image: String,

    pub embedding: Vec<f32>,
}

/// A recurring person: a stable id plus every face matched to it so far.
///
/// Records are append-only and keep insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    id: String,
    records: Vec<EmbeddingRecord>,
}

impl Identity {
    pub(crate) fn new(id: String, records: Vec<EmbeddingRecord>) -> Self {
        Self { id, records }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    /// Number of known embeddings.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct images this identity appears in, in first-seen order.
    pub fn images(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for r in &self.records {
            if !out.contains(&r.image.as_str()) {
                out.push(&r.image);
            }
        }
        out
    }

    /// L2-normalized mean of the L2-normalized known embeddings.
    pub fn centroid(&self) -> Option<Vec<f32>> {
        let dim = self.records.first()?.embedding.len();
        let mut centroid = vec![0.0f32; dim];
        for r in &self.records {
            let mut e = r.embedding.clone();
            l2_normalize(&mut e);
            for (c, x) in centroid.iter_mut().zip(&e) {
                *c += *x;
            }
        }
        let n = self.records.len() as f32;
        for c in centroid.iter_mut() {
            *c /= n;
        }
        l2_normalize(&mut centroid);
        Some(centroid)
    }
}

/// All known identities plus the id counter.
///
/// Identities are kept in creation order (ascending numeric suffix), which
/// is also the order the matcher scans them in. `next_id` only moves
/// forward, so an id is never handed out twice.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityStore {
    identities: Vec<Identity>,
    next_id: u64,
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityStore {
    pub fn new() -> Self {
        Self {
            identities: Vec::new(),
            next_id: 1,
        }
    }

    /// Builds a store from decoded parts.
    ///
    /// `next_id` is raised past every parseable suffix in `identities` and
    /// past `reserved`, the largest suffix seen among entries that were
    /// dropped during decoding.
    pub(crate) fn from_parts(mut identities: Vec<Identity>, next_id: u64, reserved: u64) -> Self {
        identities.sort_by(|a, b| {
            let ka = parse_suffix(&a.id).unwrap_or(u64::MAX);
            let kb = parse_suffix(&b.id).unwrap_or(u64::MAX);
            ka.cmp(&kb).then_with(|| a.id.cmp(&b.id))
        });
        let max_suffix = identities
            .iter()
            .filter_map(|i| parse_suffix(&i.id))
            .max()
            .unwrap_or(0)
            .max(reserved);
        Self {
            identities,
            next_id: next_id.max(max_suffix.saturating_add(1)).max(1),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Identities in scan order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Counter value the next allocated id will use (at least).
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Total number of known embeddings across all identities.
    pub fn embedding_count(&self) -> usize {
        self.identities.iter().map(Identity::len).sum()
    }

    /// Reserves a fresh id. Skips any value already taken, so a store that
    /// was edited by hand cannot cause a collision.
    ///
    /// The counter must always exceed every issued id, so `u64::MAX` itself
    /// is never issued; reaching it fails with
    /// [`PersonIdError::IdSpaceExhausted`].
    pub fn allocate_id(&mut self) -> Result<String, PersonIdError> {
        loop {
            let n = self.next_id;
            self.next_id = n.checked_add(1).ok_or(PersonIdError::IdSpaceExhausted)?;
            let id = format_id(n);
            if !self.contains(&id) {
                return Ok(id);
            }
        }
    }

    /// Creates a new identity seeded with one face and returns its id.
    pub fn create(&mut self, image: &str, embedding: Vec<f32>) -> Result<String, PersonIdError> {
        let id = self.allocate_id()?;
        self.identities.push(Identity::new(
            id.clone(),
            vec![EmbeddingRecord {
                image: image.to_string(),
                embedding,
            }],
        ));
        Ok(id)
    }

    /// Appends a face to an existing identity.
    pub fn append(&mut self, id: &str, image: &str, embedding: Vec<f32>) -> Result<(), PersonIdError> {
        let identity = self
            .identities
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| PersonIdError::UnknownIdentity(id.to_string()))?;
        identity.records.push(EmbeddingRecord {
            image: image.to_string(),
            embedding,
        });
        Ok(())
    }

    /// Ids of identities that have at least one face in `image`.
    pub fn identities_of_image(&self, image: &str) -> Vec<&str> {
        self.identities
            .iter()
            .filter(|i| i.records.iter().any(|r| r.image == image))
            .map(|i| i.id.as_str())
            .collect()
    }
}
