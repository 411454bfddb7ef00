//! Agglomerative hierarchical clustering over cosine distance.
//!
//! Used to group the faces of one batch into provisional people before they
//! are matched against the identity store. Cluster labels are batch-local and
//! carry no meaning across batches.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cosine::cosine_distance;
use crate::source::Observation;

/// How the distance between two clusters is derived from their members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Nearest pair of members.
    Single,
    /// Farthest pair of members.
    Complete,
    /// Mean distance over all member pairs (UPGMA).
    #[default]
    Average,
    /// Minimum variance increase, applied to the cosine distance matrix.
    Ward,
}

impl Linkage {
    /// Lance-Williams update: distance from cluster `k` to the union of `i`
    /// and `j`, given the pre-merge distances and cluster sizes.
    fn update(self, d_ik: f64, d_jk: f64, d_ij: f64, n_i: usize, n_j: usize, n_k: usize) -> f64 {
        let (n_i, n_j, n_k) = (n_i as f64, n_j as f64, n_k as f64);
        match self {
            Self::Single => d_ik.min(d_jk),
            Self::Complete => d_ik.max(d_jk),
            Self::Average => (n_i * d_ik + n_j * d_jk) / (n_i + n_j),
            Self::Ward => {
                ((n_i + n_k) * d_ik + (n_j + n_k) * d_jk - n_k * d_ij) / (n_i + n_j + n_k)
            }
        }
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Complete => write!(f, "complete"),
            Self::Average => write!(f, "average"),
            Self::Ward => write!(f, "ward"),
        }
    }
}

impl FromStr for Linkage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "complete" => Ok(Self::Complete),
            "average" => Ok(Self::Average),
            "ward" => Ok(Self::Ward),
            other => Err(format!("unknown linkage: {other}")),
        }
    }
}

/// Batch-local cluster label. Rendered as `cluster_<n>` so it is never
/// mistaken for a persistent identity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterLabel(pub u32);

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster_{}", self.0)
    }
}

/// One step of the dendrogram.
///
/// Node ids below the observation count refer to observations; id `n + s`
/// refers to the cluster produced by merge step `s`.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f32,
    pub size: usize,
}

/// Flat partition of one batch plus the full dendrogram it was cut from.
#[derive(Debug, Clone, Default)]
pub struct Clustering {
    images: Vec<String>,
    labels: Vec<ClusterLabel>,
    dendrogram: Vec<Merge>,
}

impl Clustering {
    /// Label of each observation, in input order.
    pub fn labels(&self) -> &[ClusterLabel] {
        &self.labels
    }

    /// Merge steps, in the order they were performed.
    pub fn dendrogram(&self) -> &[Merge] {
        &self.dendrogram
    }

    /// Number of distinct clusters in the flat partition.
    pub fn cluster_count(&self) -> usize {
        self.labels.iter().map(|l| l.0).max().unwrap_or(0) as usize
    }

    /// Labels grouped per image (one entry per face), images in order of
    /// first appearance.
    pub fn by_image(&self) -> Vec<(String, Vec<ClusterLabel>)> {
        let mut out: Vec<(String, Vec<ClusterLabel>)> = Vec::new();
        for (image, &label) in self.images.iter().zip(&self.labels) {
            match out.iter_mut().find(|(img, _)| img == image) {
                Some((_, labels)) => labels.push(label),
                None => out.push((image.clone(), vec![label])),
            }
        }
        out
    }

    /// Label of observation `idx`, if it exists.
    pub fn label_of(&self, idx: usize) -> Option<ClusterLabel> {
        self.labels.get(idx).copied()
    }
}

/// Groups observations with agglomerative clustering.
#[derive(Debug, Clone, Copy)]
pub struct Clusterer {
    linkage: Linkage,
    threshold: f32,
}

impl Clusterer {
    /// `threshold` is the cosine distance at which the dendrogram is cut:
    /// clusters whose linkage distance is `<= threshold` end up together.
    pub fn new(linkage: Linkage, threshold: f32) -> Self {
        Self { linkage, threshold }
    }

    pub fn cluster(&self, observations: &[Observation]) -> Clustering {
        let n = observations.len();
        let images: Vec<String> = observations.iter().map(|o| o.image.clone()).collect();
        match n {
            0 => return Clustering::default(),
            1 => {
                return Clustering {
                    images,
                    labels: vec![ClusterLabel(1)],
                    dendrogram: Vec::new(),
                };
            }
            _ => {}
        }

        let mut dist = vec![vec![0.0f64; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = cosine_distance(&observations[i].embedding, &observations[j].embedding) as f64;
                dist[i][j] = d;
                dist[j][i] = d;
            }
        }

        let mut active = vec![true; n];
        let mut size = vec![1usize; n];
        let mut node = (0..n).collect::<Vec<_>>();
        let mut parent = (0..n).collect::<Vec<_>>();
        let mut dendrogram = Vec::with_capacity(n - 1);

        for step in 0..(n - 1) {
            // Closest active pair; first pair in row-major order wins ties.
            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..n {
                if !active[i] {
                    continue;
                }
                for j in (i + 1)..n {
                    if !active[j] {
                        continue;
                    }
                    if best.is_none_or(|(_, _, d)| dist[i][j] < d) {
                        best = Some((i, j, dist[i][j]));
                    }
                }
            }
            let Some((i, j, d_ij)) = best else { break };

            for k in 0..n {
                if !active[k] || k == i || k == j {
                    continue;
                }
                let d = self
                    .linkage
                    .update(dist[i][k], dist[j][k], d_ij, size[i], size[j], size[k]);
                dist[i][k] = d;
                dist[k][i] = d;
            }

            dendrogram.push(Merge {
                left: node[i],
                right: node[j],
                distance: d_ij as f32,
                size: size[i] + size[j],
            });
            if d_ij <= self.threshold as f64 {
                union(&mut parent, i, j);
            }

            size[i] += size[j];
            active[j] = false;
            node[i] = n + step;
        }

        // Slot i keeps observation i as a member for the whole run, so the
        // union-find over slots doubles as one over observations.
        let mut by_root: HashMap<usize, ClusterLabel> = HashMap::new();
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let root = find(&mut parent, i);
            let next = ClusterLabel(by_root.len() as u32 + 1);
            labels.push(*by_root.entry(root).or_insert(next));
        }

        debug!(
            observations = n,
            clusters = by_root.len(),
            linkage = %self.linkage,
            threshold = self.threshold,
            "clustered batch"
        );

        Clustering {
            images,
            labels,
            dendrogram,
        }
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[rb] = ra;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(image: &str, embedding: &[f32]) -> Observation {
        Observation {
            image: image.into(),
            face: 0,
            embedding: embedding.to_vec(),
        }
    }

    fn two_groups() -> Vec<Observation> {
        vec![
            obs("a.jpg", &[1.0, 0.0, 0.0]),
            obs("b.jpg", &[0.0, 1.0, 0.0]),
            obs("c.jpg", &[0.99, 0.1, 0.0]),
            obs("d.jpg", &[0.1, 0.99, 0.0]),
            obs("e.jpg", &[0.98, 0.15, 0.0]),
        ]
    }

    #[test]
    fn empty_batch() {
        let c = Clusterer::new(Linkage::Average, 0.4).cluster(&[]);
        assert!(c.labels().is_empty());
        assert!(c.dendrogram().is_empty());
        assert_eq!(c.cluster_count(), 0);
    }

    #[test]
    fn single_observation_is_singleton() {
        let c = Clusterer::new(Linkage::Average, 0.4).cluster(&[obs("a.jpg", &[1.0, 0.0])]);
        assert_eq!(c.labels(), &[ClusterLabel(1)]);
        assert_eq!(c.cluster_count(), 1);
    }

    #[test]
    fn separates_two_people_for_every_linkage() {
        for linkage in [Linkage::Single, Linkage::Complete, Linkage::Average, Linkage::Ward] {
            let c = Clusterer::new(linkage, 0.3).cluster(&two_groups());
            let l = c.labels();
            assert_eq!(c.cluster_count(), 2, "{linkage}");
            assert_eq!(l[0], l[2], "{linkage}");
            assert_eq!(l[0], l[4], "{linkage}");
            assert_eq!(l[1], l[3], "{linkage}");
            assert_ne!(l[0], l[1], "{linkage}");
        }
    }

    #[test]
    fn labels_follow_first_appearance() {
        let c = Clusterer::new(Linkage::Average, 0.3).cluster(&two_groups());
        assert_eq!(c.labels()[0], ClusterLabel(1));
        assert_eq!(c.labels()[1], ClusterLabel(2));
    }

    #[test]
    fn dendrogram_is_complete() {
        let c = Clusterer::new(Linkage::Complete, 0.3).cluster(&two_groups());
        let d = c.dendrogram();
        assert_eq!(d.len(), 4);
        assert_eq!(d.last().map(|m| m.size), Some(5));
        // The final merge joins the two people and sits above the cut.
        assert!(d[3].distance > 0.3);
        assert!(d.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn threshold_controls_granularity() {
        let obs = two_groups();
        let fine = Clusterer::new(Linkage::Average, 0.0001).cluster(&obs);
        assert_eq!(fine.cluster_count(), 5);
        let coarse = Clusterer::new(Linkage::Average, 1.5).cluster(&obs);
        assert_eq!(coarse.cluster_count(), 1);
    }

    #[test]
    fn by_image_groups_faces() {
        let obs = vec![
            obs("group.jpg", &[1.0, 0.0]),
            obs("solo.jpg", &[0.99, 0.05]),
            obs("group.jpg", &[0.0, 1.0]),
        ];
        let c = Clusterer::new(Linkage::Average, 0.2).cluster(&obs);
        let by_image = c.by_image();
        assert_eq!(by_image.len(), 2);
        assert_eq!(by_image[0].0, "group.jpg");
        assert_eq!(by_image[0].1, vec![ClusterLabel(1), ClusterLabel(2)]);
        assert_eq!(by_image[1].1, vec![ClusterLabel(1)]);
    }

    #[test]
    fn linkage_parse_and_display() {
        assert_eq!("Ward".parse::<Linkage>(), Ok(Linkage::Ward));
        assert_eq!(Linkage::Single.to_string(), "single");
        assert!("median".parse::<Linkage>().is_err());
        assert_eq!(ClusterLabel(3).to_string(), "cluster_3");
    }
}
