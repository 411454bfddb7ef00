use serde::{Deserialize, Serialize};

use crate::cluster::Linkage;
use crate::error::PersonIdError;

/// Default embedding dimension (FaceNet-style 128-d vectors).
pub const DEFAULT_DIM: usize = 128;
/// Default minimum cosine similarity to join an existing identity.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;
/// Default cosine distance at which the batch dendrogram is cut.
pub const DEFAULT_CLUSTER_THRESHOLD: f32 = 0.4;

/// Controls tagger behavior.
///
/// Zero values are replaced by defaults, so a partially filled YAML file
/// (or `Config { dim: 512, ..Default::default() }`) works as expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Embedding dimension produced by the face model.
    pub dim: usize,

    /// Minimum cosine similarity for a face to join an existing identity.
    /// Lower = more lenient (more merges), higher = stricter (more new people).
    pub match_threshold: f32,

    /// Cosine distance cut-off for intra-batch clustering.
    pub cluster_threshold: f32,

    /// Linkage used by intra-batch clustering.
    pub linkage: Linkage,

    /// When set, a face with no store match reuses the identity already
    /// given to its batch cluster instead of creating another one.
    pub cluster_hint: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIM,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            cluster_threshold: DEFAULT_CLUSTER_THRESHOLD,
            linkage: Linkage::default(),
            cluster_hint: false,
        }
    }
}

impl Config {
    pub(crate) fn with_defaults(mut self) -> Self {
        if self.dim == 0 {
            self.dim = DEFAULT_DIM;
        }
        if self.match_threshold == 0.0 {
            self.match_threshold = DEFAULT_MATCH_THRESHOLD;
        }
        if self.cluster_threshold == 0.0 {
            self.cluster_threshold = DEFAULT_CLUSTER_THRESHOLD;
        }
        self
    }

    /// Checks that thresholds are usable.
    pub fn validate(&self) -> Result<(), PersonIdError> {
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(PersonIdError::InvalidConfig(format!(
                "match_threshold must be in (0, 1], got {}",
                self.match_threshold
            )));
        }
        if !(self.cluster_threshold > 0.0 && self.cluster_threshold <= 2.0) {
            return Err(PersonIdError::InvalidConfig(format!(
                "cluster_threshold must be in (0, 2], got {}",
                self.cluster_threshold
            )));
        }
        Ok(())
    }
}
