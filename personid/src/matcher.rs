use tracing::debug;

use crate::cosine::cosine_similarity;
use crate::error::PersonIdError;
use crate::identity::{Identity, IdentityStore};

/// Outcome of comparing one embedding against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    /// The best identity reached the threshold.
    Matched { id: String, similarity: f32 },

    /// Nothing reached the threshold. `best` holds the closest identity, if
    /// the store had any, for diagnostics.
    Unmatched { best: Option<(String, f32)> },
}

impl MatchDecision {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// Result of [`Matcher::assign`].
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub id: String,
    /// True when the observation created a new identity.
    pub created: bool,
    /// Similarity to the matched identity; 0 for new identities.
    pub similarity: f32,
}

/// Nearest-neighbor matching against every known embedding in the store.
///
/// Similarity is cosine similarity; higher means more alike. An observation
/// joins the identity holding its single most similar known embedding when
/// that similarity is `>= threshold`.
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    dim: usize,
    threshold: f32,
}

impl Matcher {
    pub fn new(dim: usize, threshold: f32) -> Self {
        Self { dim, threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Rejects embeddings of the wrong dimension or with NaN/infinite values.
    pub fn check(&self, emb: &[f32]) -> Result<(), PersonIdError> {
        if emb.len() != self.dim {
            return Err(PersonIdError::DimensionMismatch {
                expected: self.dim,
                got: emb.len(),
            });
        }
        if let Some(index) = emb.iter().position(|x| !x.is_finite()) {
            return Err(PersonIdError::NonFinite { index });
        }
        Ok(())
    }

    /// Returns the identity holding the most similar known embedding.
    ///
    /// Only a strictly greater similarity replaces the current best, so on a
    /// tie the identity scanned first wins.
    pub fn best_match<'a>(&self, store: &'a IdentityStore, emb: &[f32]) -> Option<(&'a Identity, f32)> {
        let mut best: Option<(&Identity, f32)> = None;
        for identity in store.iter() {
            for record in identity.records() {
                if record.embedding.len() != emb.len() {
                    continue;
                }
                let sim = cosine_similarity(emb, &record.embedding);
                if best.is_none_or(|(_, b)| sim > b) {
                    best = Some((identity, sim));
                }
            }
        }
        best
    }

    /// Decides match vs. new identity without touching the store.
    pub fn decide(&self, store: &IdentityStore, emb: &[f32]) -> Result<MatchDecision, PersonIdError> {
        self.check(emb)?;
        let decision = match self.best_match(store, emb) {
            Some((identity, similarity)) if similarity >= self.threshold => MatchDecision::Matched {
                id: identity.id().to_string(),
                similarity,
            },
            best => MatchDecision::Unmatched {
                best: best.map(|(i, s)| (i.id().to_string(), s)),
            },
        };
        Ok(decision)
    }

    /// Records a decision in the store: appends to the matched identity or
    /// creates a new one. Returns the assigned id.
    pub fn apply(
        &self,
        store: &mut IdentityStore,
        image: &str,
        emb: Vec<f32>,
        decision: &MatchDecision,
    ) -> Result<Assignment, PersonIdError> {
        match decision {
            MatchDecision::Matched { id, similarity } => {
                store.append(id, image, emb)?;
                Ok(Assignment {
                    id: id.clone(),
                    created: false,
                    similarity: *similarity,
                })
            }
            MatchDecision::Unmatched { .. } => Ok(Assignment {
                id: store.create(image, emb)?,
                created: true,
                similarity: 0.0,
            }),
        }
    }

    /// [`decide`](Self::decide) followed by [`apply`](Self::apply).
    pub fn assign(&self, store: &mut IdentityStore, image: &str, emb: Vec<f32>) -> Result<Assignment, PersonIdError> {
        let decision = self.decide(store, &emb)?;
        let assignment = self.apply(store, image, emb, &decision)?;
        debug!(
            image,
            id = %assignment.id,
            created = assignment.created,
            similarity = assignment.similarity,
            "assigned face"
        );
        Ok(assignment)
    }
}
