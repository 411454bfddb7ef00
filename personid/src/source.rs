use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Produces face embeddings for an image.
///
/// Face detection and the embedding model live outside this crate; an
/// implementation wraps whatever vision model the deployment uses. A call
/// may block for a long time.
///
/// Implementations must be safe for concurrent use.
pub trait EmbeddingSource: Send + Sync {
    /// Returns one embedding per detected face. An image without faces
    /// yields an empty vector, not an error.
    fn extract(&self, image: &str) -> Result<Vec<Vec<f32>>, ExtractError>;
}

/// Faces already extracted for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFaces {
    /// Image reference (URL or path) as supplied by the caller.
    pub image: String,

    /// One embedding per detected face.
    #[serde(default)]
    pub faces: Vec<Vec<f32>>,
}

impl ImageFaces {
    pub fn new(image: impl Into<String>, faces: Vec<Vec<f32>>) -> Self {
        Self {
            image: image.into(),
            faces,
        }
    }
}

/// One face of one image, in batch order.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub image: String,
    /// Index of the face within its image.
    pub face: usize,
    pub embedding: Vec<f32>,
}

/// [`EmbeddingSource`] backed by embeddings computed ahead of time.
#[derive(Debug, Default)]
pub struct Precomputed {
    faces: HashMap<String, Vec<Vec<f32>>>,
}

impl Precomputed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the faces of one image, replacing any earlier entry.
    pub fn insert(&mut self, image: impl Into<String>, faces: Vec<Vec<f32>>) {
        self.faces.insert(image.into(), faces);
    }
}

impl FromIterator<ImageFaces> for Precomputed {
    fn from_iter<I: IntoIterator<Item = ImageFaces>>(iter: I) -> Self {
        let mut src = Self::new();
        for item in iter {
            src.insert(item.image, item.faces);
        }
        src
    }
}

impl EmbeddingSource for Precomputed {
    fn extract(&self, image: &str) -> Result<Vec<Vec<f32>>, ExtractError> {
        self.faces
            .get(image)
            .cloned()
            .ok_or_else(|| ExtractError::NotFound(image.to_string()))
    }
}
