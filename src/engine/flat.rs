//! Brute-force flat engine with exact O(n) k-NN search

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::Metric;
use crate::error::{AdapterError, Result};
use crate::stream::{self, IoReader, IoWriter};
use crate::vector::check_batch;

use super::{AnnEngine, RawNeighbors, SearchParams, MAX_IMAGE_FRAME};

/// A flat engine that computes the distance to every stored vector.
/// Search breadth parameters are ignored.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlatEngine {
    dimension: usize,
    metric: Metric,
    /// Row-major vector data, `labels.len() * dimension` floats.
    data: Vec<f32>,
    labels: Vec<i64>,
}

impl FlatEngine {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            data: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Iterate over all `(label, vector)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &[f32])> {
        self.labels
            .iter()
            .copied()
            .zip(self.data.chunks_exact(self.dimension))
    }
}

impl AnnEngine for FlatEngine {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn len(&self) -> usize {
        self.labels.len()
    }

    fn add_with_ids(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        check_batch(vectors, ids.len(), self.dimension)?;
        self.data.extend_from_slice(vectors);
        self.labels.extend_from_slice(ids);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, _params: &SearchParams) -> Result<RawNeighbors> {
        if query.len() != self.dimension {
            return Err(AdapterError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let metric = self.metric;
        let mut scored: Vec<(i64, f32)> = self
            .data
            .par_chunks_exact(self.dimension)
            .zip(self.labels.par_iter())
            .map(|(row, &label)| (label, metric.distance_unchecked(query, row)))
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(RawNeighbors::from_sorted(k, scored))
    }

    fn write_image(&self, writer: &mut dyn IoWriter) -> Result<()> {
        stream::write_bincode_frame(writer, self)
    }

    fn read_image(&mut self, reader: &mut dyn IoReader) -> Result<()> {
        let loaded: FlatEngine = stream::read_bincode_frame(reader, MAX_IMAGE_FRAME)?;
        if loaded.data.len() != loaded.labels.len() * loaded.dimension {
            return Err(AdapterError::CorruptImage(
                "flat image row count does not match label count".to_string(),
            ));
        }
        *self = loaded;
        Ok(())
    }
}
