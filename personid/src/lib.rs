//! Recurring-person identity resolution for diary photos.
//!
//! Faces come in as embedding vectors (one per detected face, produced by
//! an external model). Each batch is clustered on its own, then every face
//! is matched against a persistent identity store so the same person keeps
//! the same `person_<N>` id across uploads.
//!
//! # Usage
//!
//! ```
//! use mindlog_personid::{Config, ImageFaces, Tagger};
//!
//! let tagger = Tagger::with_memory_backend(Config { dim: 3, ..Default::default() }).unwrap();
//! let result = tagger
//!     .tag(vec![
//!         ImageFaces::new("beach.jpg", vec![vec![1.0, 0.0, 0.0]]),
//!         ImageFaces::new("cafe.jpg", vec![vec![0.98, 0.1, 0.0], vec![0.0, 0.0, 1.0]]),
//!     ])
//!     .unwrap();
//!
//! assert_eq!(result.tags_of("beach.jpg").unwrap(), ["person_1"]);
//! assert_eq!(result.tags_of("cafe.jpg").unwrap(), ["person_1", "person_2"]);
//! ```
//!
//! # Pipeline
//!
//! 1. [`EmbeddingSource`]: image -> face embeddings (external model)
//! 2. [`Clusterer`]: batch-local agglomerative clustering on cosine distance
//! 3. [`Matcher`]: best known embedding per face, match or new identity
//! 4. [`StoreBackend`]: load before, atomic save after a mutating batch
//!
//! [`Tagger`] runs the whole pipeline under a single lock.

mod cluster;
mod config;
mod cosine;
mod error;
mod identity;
mod matcher;
mod source;
mod store;
mod tagger;

pub use cluster::{ClusterLabel, Clusterer, Clustering, Linkage, Merge};
pub use config::{Config, DEFAULT_CLUSTER_THRESHOLD, DEFAULT_DIM, DEFAULT_MATCH_THRESHOLD};
pub use cosine::{cosine_distance, cosine_similarity, l2_normalize};
pub use error::{ExtractError, PersonIdError};
pub use identity::{format_id, parse_suffix, EmbeddingRecord, Identity, IdentityStore, ID_PREFIX};
pub use matcher::{Assignment, MatchDecision, Matcher};
pub use source::{EmbeddingSource, ImageFaces, Observation, Precomputed};
pub use store::{decode_document, encode_document, JsonFileBackend, MemoryBackend, StoreBackend, FORMAT_VERSION};
pub use tagger::{BatchResult, ImageStatus, ImageTags, SkipReason, Skipped, Tagger};
