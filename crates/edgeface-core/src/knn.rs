//! Exhaustive k-nearest-neighbor search and the weighted label vote.
//!
//! Every query computes the Euclidean distance to every enrolled vector, so
//! cost grows linearly with the dataset. That bounds how many samples can be
//! enrolled for real-time use.

use crate::config::Weighting;
use crate::dataset::Dataset;
use crate::types::QueryVector;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("k must be at least 1")]
    ZeroNeighbors,
    #[error("requested k = {requested} neighbors but the dataset holds only {available} samples")]
    InsufficientSamples { requested: usize, available: usize },
    #[error("query has {actual} values, dataset vectors have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// One enrolled sample close to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Position of the sample in enrollment order.
    pub index: usize,
    pub label: String,
    pub distance: f32,
}

/// The k closest samples, ascending by distance, ties in enrollment order.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborSet {
    neighbors: Vec<Neighbor>,
}

impl NeighborSet {
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Neighbor> {
        self.neighbors.iter()
    }

    pub fn nearest(&self) -> Option<&Neighbor> {
        self.neighbors.first()
    }

    /// Arithmetic mean of the neighbor distances (0 for an empty set).
    pub fn mean_distance(&self) -> f32 {
        if self.neighbors.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.neighbors.iter().map(|n| n.distance as f64).sum();
        (sum / self.neighbors.len() as f64) as f32
    }
}

impl<'a> IntoIterator for &'a NeighborSet {
    type Item = &'a Neighbor;
    type IntoIter = std::slice::Iter<'a, Neighbor>;

    fn into_iter(self) -> Self::IntoIter {
        self.neighbors.iter()
    }
}

/// Find the `k` samples closest to `query`.
///
/// `k` is never silently reduced: asking for more neighbors than there are
/// samples is an error.
pub fn query(query: &QueryVector, dataset: &Dataset, k: usize) -> Result<NeighborSet, SearchError> {
    if k == 0 {
        return Err(SearchError::ZeroNeighbors);
    }
    if k > dataset.len() {
        return Err(SearchError::InsufficientSamples {
            requested: k,
            available: dataset.len(),
        });
    }
    if query.dimension() != dataset.dimension() {
        return Err(SearchError::DimensionMismatch {
            expected: dataset.dimension(),
            actual: query.dimension(),
        });
    }

    let mut ranked: Vec<(usize, f32)> = dataset
        .distances(&query.values)
        .into_iter()
        .enumerate()
        .collect();
    // Stable: equal distances keep enrollment order.
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked.truncate(k);

    let neighbors = ranked
        .into_iter()
        .map(|(index, distance)| Neighbor {
            index,
            label: dataset.label(index).to_string(),
            distance,
        })
        .collect();

    Ok(NeighborSet { neighbors })
}

/// Majority vote over the neighbor labels.
///
/// With [`Weighting::Distance`] each neighbor counts `1 / distance`; if any
/// neighbor sits at distance 0, only the exact matches vote. Labels with
/// equal total weight resolve to the one owning the closest single neighbor.
/// Returns `None` for an empty set.
pub fn vote(neighbors: &NeighborSet, weighting: Weighting) -> Option<&str> {
    let exact_match = neighbors.iter().any(|n| n.distance == 0.0);

    // Tallies in order of first appearance, which is ascending distance.
    let mut tallies: Vec<(&str, f64)> = Vec::new();
    for n in neighbors {
        let weight = match weighting {
            Weighting::Uniform => 1.0,
            Weighting::Distance if exact_match => {
                if n.distance == 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Weighting::Distance => 1.0 / n.distance as f64,
        };
        match tallies.iter_mut().find(|(label, _)| *label == n.label) {
            Some((_, total)) => *total += weight,
            None => tallies.push((n.label.as_str(), weight)),
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for (label, total) in tallies {
        // Strictly greater: on a tie the earlier (closer) label stays.
        if best.map_or(true, |(_, best_total)| total > best_total) {
            best = Some((label, total));
        }
    }
    best.map(|(label, _)| label)
}
