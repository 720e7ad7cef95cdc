//! Neighbour Index - spatial grid for approximate k-nearest-neighbour queries
//!
//! Training vectors are bucketed by `floor(x / width)` per dimension. A query
//! only scans the 3^D buckets of the Moore neighbourhood around its own key,
//! then runs a bounded worst-of-k scan over those candidates.
//!
//! True neighbours more than one bucket width away from the query can be
//! missed. `query_exhaustive` is the exact reference.

mod set;

pub use set::{Neighbour, NeighbourSet};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::{GridConfig, KnnConfig};
use crate::error::{Error, Result};
use crate::features::FeatureVector;

/// Pluggable distance between two feature vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    /// sum(ln(1 + |a - b|)), damps the weight of outlier dimensions
    Lorentzian,
    Manhattan,
}

impl DistanceMetric {
    #[inline]
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let pairs = a.iter().zip(b.iter());
        match self {
            DistanceMetric::Euclidean => pairs.map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
            DistanceMetric::Lorentzian => pairs.map(|(x, y)| (x - y).abs().ln_1p()).sum(),
            DistanceMetric::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
        }
    }
}

/// Bucket coordinate of a feature vector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridKey(Vec<i64>);

impl GridKey {
    /// Bucket of `vector`, or `None` when a coordinate does not fit in an `i64`.
    pub fn of(vector: &[f64], widths: &[f64]) -> Option<Self> {
        vector
            .iter()
            .zip(widths.iter())
            .map(|(x, w)| {
                let cell = (x / w).floor();
                // i64::MAX as f64 rounds up to 2^63, hence the strict bound
                (cell >= i64::MIN as f64 && cell < i64::MAX as f64).then(|| cell as i64)
            })
            .collect::<Option<Vec<i64>>>()
            .map(GridKey)
    }

    pub fn coords(&self) -> &[i64] {
        &self.0
    }

    /// The 3^D keys with every coordinate offset by -1, 0 or +1 (self included).
    ///
    /// Keys that would step past the `i64` range are left out.
    pub fn moore_neighbourhood(&self) -> Vec<GridKey> {
        let dims = self.0.len();
        let mut keys = Vec::with_capacity(3usize.pow(dims as u32));
        let mut offsets = vec![-1i64; dims];
        loop {
            let shifted: Option<Vec<i64>> = self
                .0
                .iter()
                .zip(offsets.iter())
                .map(|(c, o)| c.checked_add(*o))
                .collect();
            if let Some(coords) = shifted {
                keys.push(GridKey(coords));
            }

            // Odometer increment over {-1, 0, 1}^D
            let mut d = 0;
            loop {
                if d == dims {
                    return keys;
                }
                if offsets[d] < 1 {
                    offsets[d] += 1;
                    break;
                }
                offsets[d] = -1;
                d += 1;
            }
        }
    }
}

/// Read-only grid index over training feature vectors.
///
/// Built once; queries never mutate it, so it can be shared across threads.
#[derive(Debug, Clone)]
pub struct GridIndex {
    widths: Vec<f64>,
    metric: DistanceMetric,
    /// Flattened stored vectors, `dims` values per slot
    points: Vec<f64>,
    /// Original training index of each slot
    origins: Vec<usize>,
    /// Slots per bucket, in insertion order
    buckets: HashMap<GridKey, Vec<usize>>,
}

impl GridIndex {
    /// Build from a training vector sequence. Undefined entries are skipped
    /// but every stored vector keeps its original index.
    pub fn build(
        vectors: &[Option<FeatureVector>],
        widths: Vec<f64>,
        metric: DistanceMetric,
    ) -> Result<Self> {
        if widths.is_empty() {
            return Err(Error::invalid_config("grid needs at least one dimension"));
        }
        if let Some(w) = widths.iter().find(|w| !(w.is_finite() && **w > 0.0)) {
            return Err(Error::invalid_config(format!(
                "bucket width must be positive, got {}",
                w
            )));
        }

        let dims = widths.len();
        let mut index = Self {
            widths,
            metric,
            points: Vec::new(),
            origins: Vec::new(),
            buckets: HashMap::new(),
        };

        for (origin, vector) in vectors.iter().enumerate() {
            let Some(vector) = vector else { continue };
            let values = vector.as_slice();
            if values.len() != dims {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    found: values.len(),
                });
            }
            if values.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let Some(key) = GridKey::of(values, &index.widths) else {
                warn!(
                    "Skipping training vector {}: {:?} is off the grid for widths {:?}",
                    origin, values, index.widths
                );
                continue;
            };

            let slot = index.origins.len();
            index.points.extend_from_slice(values);
            index.origins.push(origin);
            index.buckets.entry(key).or_default().push(slot);
        }

        debug!(
            "Built grid index: {} vectors in {} buckets ({} dims)",
            index.len(),
            index.bucket_count(),
            dims
        );

        Ok(index)
    }

    /// Build with widths resolved from the grid and neighbour sections.
    pub fn from_config(
        vectors: &[Option<FeatureVector>],
        dims: usize,
        grid: &GridConfig,
        knn: &KnnConfig,
    ) -> Result<Self> {
        let widths = grid.resolve_widths(dims, knn.threshold);
        if widths.len() != dims {
            return Err(Error::DimensionMismatch {
                expected: dims,
                found: widths.len(),
            });
        }
        Self::build(vectors, widths, grid.metric)
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn dimensions(&self) -> usize {
        self.widths.len()
    }

    pub fn widths(&self) -> &[f64] {
        &self.widths
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    #[inline]
    fn point(&self, slot: usize) -> &[f64] {
        let dims = self.dimensions();
        &self.points[slot * dims..(slot + 1) * dims]
    }

    fn check_arity(&self, vector: &[f64]) -> Result<()> {
        if vector.len() != self.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions(),
                found: vector.len(),
            });
        }
        Ok(())
    }

    /// Empty when `vector` has no grid key.
    fn candidate_slots(&self, vector: &[f64]) -> Vec<usize> {
        let Some(key) = GridKey::of(vector, &self.widths) else {
            return Vec::new();
        };
        key.moore_neighbourhood()
            .iter()
            .filter_map(|key| self.buckets.get(key))
            .flat_map(|slots| slots.iter().copied())
            .collect()
    }

    /// Training indices in the Moore neighbourhood of `vector`.
    pub fn candidates(&self, vector: &[f64]) -> Result<Vec<usize>> {
        self.check_arity(vector)?;
        if vector.iter().any(|v| !v.is_finite()) {
            return Ok(Vec::new());
        }
        Ok(self
            .candidate_slots(vector)
            .into_iter()
            .map(|slot| self.origins[slot])
            .collect())
    }

    /// Approximate k nearest neighbours, sorted ascending by distance.
    ///
    /// Empty when the neighbourhood holds fewer than `k` candidates or the
    /// query has an undefined component; never a partial result.
    pub fn query(&self, vector: &[f64], k: usize) -> Result<Vec<Neighbour>> {
        self.check_arity(vector)?;
        if k == 0 || vector.iter().any(|v| !v.is_finite()) {
            return Ok(Vec::new());
        }

        let slots = self.candidate_slots(vector);
        if slots.len() < k {
            return Ok(Vec::new());
        }
        Ok(self.scan(vector, k, slots.into_iter()))
    }

    /// Exact k nearest neighbours by linear scan over every stored vector.
    pub fn query_exhaustive(&self, vector: &[f64], k: usize) -> Result<Vec<Neighbour>> {
        self.check_arity(vector)?;
        if k == 0 || vector.iter().any(|v| !v.is_finite()) || self.len() < k {
            return Ok(Vec::new());
        }
        Ok(self.scan(vector, k, 0..self.len()))
    }

    fn scan(&self, vector: &[f64], k: usize, slots: impl Iterator<Item = usize>) -> Vec<Neighbour> {
        let mut set = NeighbourSet::new(k);
        for slot in slots {
            set.offer(Neighbour {
                distance: self.metric.distance(vector, self.point(slot)),
                index: self.origins[slot],
            });
        }
        set.finalize()
    }
}
