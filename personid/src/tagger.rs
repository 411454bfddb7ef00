use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterLabel, Clusterer};
use crate::config::Config;
use crate::cosine::cosine_similarity;
use crate::error::{ExtractError, PersonIdError};
use crate::identity::IdentityStore;
use crate::matcher::{MatchDecision, Matcher};
use crate::source::{EmbeddingSource, ImageFaces, Observation};
use crate::store::{MemoryBackend, StoreBackend};

/// How an image fared in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// At least one face was assigned an identity.
    Tagged,
    /// Extraction worked and found no faces.
    NoFaces,
    /// The embedding source failed for every occurrence of this image.
    ExtractionFailed,
    /// Faces were found but every one was rejected.
    Rejected,
}

/// Identities assigned to one image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageTags {
    pub image: String,

    /// Assigned identity ids, in face order, without duplicates.
    pub identities: Vec<String>,

    /// Batch-local cluster label of every accepted face, in face order.
    pub clusters: Vec<ClusterLabel>,

    pub status: ImageStatus,
}

/// Why a face or an image was left out of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    ExtractionFailed { message: String },
    DimensionMismatch { expected: usize, got: usize },
    NonFinite { index: usize },
}

/// A face (or a whole image when `face` is `None`) that was skipped.
///
/// Every failed extraction is listed, even for an image repeated in the
/// batch whose other occurrence succeeded; that image's status comes from
/// the faces that were extracted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<usize>,
    pub reason: SkipReason,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    /// One entry per distinct input image, in input order.
    pub images: Vec<ImageTags>,

    pub skipped: Vec<Skipped>,

    /// Identities created by this batch, in creation order.
    pub created: Vec<String>,

    /// Whether the identity store was written.
    pub persisted: bool,
}

impl BatchResult {
    /// Identity ids assigned to `image`, if it was part of the batch.
    pub fn tags_of(&self, image: &str) -> Option<&[String]> {
        self.images
            .iter()
            .find(|t| t.image == image)
            .map(|t| t.identities.as_slice())
    }

    /// Flattens the result to `image -> [identity ids]`.
    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.images
            .iter()
            .map(|t| (t.image.clone(), t.identities.clone()))
            .collect()
    }

    /// Number of distinct identities assigned across the batch.
    pub fn identity_count(&self) -> usize {
        let mut ids: Vec<&str> = self
            .images
            .iter()
            .flat_map(|t| t.identities.iter().map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

struct PendingImage {
    image: String,
    faces: Vec<Vec<f32>>,
    extracted: bool,
}

/// Tags batches of images with recurring-person identities.
///
/// Each batch runs load -> cluster -> match -> save while holding one lock
/// around the backend, so concurrent batches cannot hand out the same id.
/// The store is loaded fresh per batch and written only after every face
/// was processed; if the write fails the batch fails and nothing it
/// assigned is reported.
pub struct Tagger {
    cfg: Config,
    clusterer: Clusterer,
    matcher: Matcher,
    backend: Mutex<Box<dyn StoreBackend>>,
}

impl Tagger {
    pub fn new(cfg: Config, backend: Box<dyn StoreBackend>) -> Result<Self, PersonIdError> {
        let cfg = cfg.with_defaults();
        cfg.validate()?;
        Ok(Self {
            clusterer: Clusterer::new(cfg.linkage, cfg.cluster_threshold),
            matcher: Matcher::new(cfg.dim, cfg.match_threshold),
            cfg,
            backend: Mutex::new(backend),
        })
    }

    /// Creates a Tagger with a fresh in-memory backend.
    pub fn with_memory_backend(cfg: Config) -> Result<Self, PersonIdError> {
        Self::new(cfg, Box::new(MemoryBackend::new()))
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Current contents of the identity store.
    pub fn snapshot(&self) -> IdentityStore {
        self.backend.lock().load()
    }

    /// Tags images whose faces were extracted by the caller.
    pub fn tag(&self, batch: impl IntoIterator<Item = ImageFaces>) -> Result<BatchResult, PersonIdError> {
        self.run(batch.into_iter().map(|f| (f.image, Ok(f.faces))).collect())
    }

    /// Tags images, pulling faces from `source`. Extraction runs before the
    /// store lock is taken.
    pub fn tag_images(&self, images: &[&str], source: &dyn EmbeddingSource) -> Result<BatchResult, PersonIdError> {
        let inputs = images
            .iter()
            .map(|&image| (image.to_string(), source.extract(image)))
            .collect();
        self.run(inputs)
    }

    fn run(&self, inputs: Vec<(String, Result<Vec<Vec<f32>>, ExtractError>)>) -> Result<BatchResult, PersonIdError> {
        let mut result = BatchResult::default();

        // Repeated image references are merged into their first position.
        let mut pending: Vec<PendingImage> = Vec::new();
        for (image, faces) in inputs {
            let idx = match pending.iter().position(|p| p.image == image) {
                Some(idx) => idx,
                None => {
                    pending.push(PendingImage {
                        image,
                        faces: Vec::new(),
                        extracted: false,
                    });
                    pending.len() - 1
                }
            };
            let p = &mut pending[idx];
            match faces {
                Ok(faces) => {
                    p.extracted = true;
                    p.faces.extend(faces);
                }
                Err(e) => {
                    warn!(image = %p.image, error = %e, "face extraction failed, skipping image");
                    result.skipped.push(Skipped {
                        image: p.image.clone(),
                        face: None,
                        reason: SkipReason::ExtractionFailed { message: e.to_string() },
                    });
                }
            }
        }

        let mut observations: Vec<Observation> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for p in pending {
            let mut status = if !p.extracted {
                ImageStatus::ExtractionFailed
            } else if p.faces.is_empty() {
                ImageStatus::NoFaces
            } else {
                ImageStatus::Tagged
            };

            let mut accepted = 0usize;
            for (face, embedding) in p.faces.into_iter().enumerate() {
                match self.matcher.check(&embedding) {
                    Ok(()) => {
                        observations.push(Observation {
                            image: p.image.clone(),
                            face,
                            embedding,
                        });
                        accepted += 1;
                    }
                    Err(e) => {
                        warn!(image = %p.image, face, error = %e, "rejecting face embedding");
                        result.skipped.push(Skipped {
                            image: p.image.clone(),
                            face: Some(face),
                            reason: skip_reason(e),
                        });
                    }
                }
            }
            if status == ImageStatus::Tagged && accepted == 0 {
                status = ImageStatus::Rejected;
            }

            positions.insert(p.image.clone(), result.images.len());
            result.images.push(ImageTags {
                image: p.image,
                identities: Vec::new(),
                clusters: Vec::new(),
                status,
            });
        }

        if observations.is_empty() {
            info!(
                images = result.images.len(),
                skipped = result.skipped.len(),
                "batch has no faces, store untouched"
            );
            return Ok(result);
        }

        let clustering = self.clusterer.cluster(&observations);
        let face_count = observations.len();

        let mut backend = self.backend.lock();
        let mut store = backend.load();
        let mut cluster_ids: HashMap<ClusterLabel, String> = HashMap::new();
        let mut matched = 0usize;
        let mut mutated = false;

        for (i, obs) in observations.into_iter().enumerate() {
            let label = clustering.labels()[i];
            let mut decision = self.matcher.decide(&store, &obs.embedding)?;

            if self.cfg.cluster_hint && !decision.is_match() {
                if let Some(id) = cluster_ids.get(&label) {
                    let similarity = store
                        .get(id)
                        .map(|identity| {
                            identity
                                .records()
                                .iter()
                                .map(|r| cosine_similarity(&obs.embedding, &r.embedding))
                                .fold(f32::MIN, f32::max)
                        })
                        .unwrap_or(0.0);
                    debug!(image = %obs.image, id = %id, %label, similarity, "reusing cluster identity");
                    decision = MatchDecision::Matched {
                        id: id.clone(),
                        similarity,
                    };
                }
            }

            let assignment = self.matcher.apply(&mut store, &obs.image, obs.embedding, &decision)?;
            mutated = true;
            debug!(
                image = %obs.image,
                face = obs.face,
                id = %assignment.id,
                created = assignment.created,
                similarity = assignment.similarity,
                "assigned face"
            );

            cluster_ids.entry(label).or_insert_with(|| assignment.id.clone());
            if assignment.created {
                result.created.push(assignment.id.clone());
            } else {
                matched += 1;
            }

            let tags = &mut result.images[positions[&obs.image]];
            tags.clusters.push(label);
            if !tags.identities.contains(&assignment.id) {
                tags.identities.push(assignment.id);
            }
        }

        if mutated {
            if let Err(e) = backend.save(&store) {
                error!(error = %e, "failed to persist identity store, discarding batch");
                return Err(e);
            }
            result.persisted = true;
        }

        info!(
            images = result.images.len(),
            faces = face_count,
            clusters = clustering.cluster_count(),
            matched,
            created = result.created.len(),
            skipped = result.skipped.len(),
            identities = store.len(),
            "batch tagged"
        );
        Ok(result)
    }
}

fn skip_reason(err: PersonIdError) -> SkipReason {
    match err {
        PersonIdError::DimensionMismatch { expected, got } => SkipReason::DimensionMismatch { expected, got },
        PersonIdError::NonFinite { index } => SkipReason::NonFinite { index },
        other => SkipReason::ExtractionFailed {
            message: other.to_string(),
        },
    }
}
