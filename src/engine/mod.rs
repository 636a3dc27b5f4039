//! Delegate engine contract.
//!
//! The adapter never looks inside an engine: it feeds batches through
//! [`AnnEngine::add_with_ids`], queries through [`AnnEngine::search`], and moves the
//! engine's binary image through the [`IoWriter`]/[`IoReader`] callbacks.

pub mod flat;
pub mod hnsw;

pub use flat::FlatEngine;
pub use hnsw::{HnswEngine, HnswParams};

use std::sync::Once;

use crate::distance::Metric;
use crate::error::{AdapterError, Result};
use crate::stream::{IoReader, IoWriter};

/// Largest single frame an engine will accept when reading an image (16 GiB).
pub const MAX_IMAGE_FRAME: u64 = 16 << 30;

/// Index types accepted by `create_index`. Raw values outside `[0, MAX_INDEX_TYPE)`
/// are rejected.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Hnsw = 0,
    Flat = 1,
}

/// One past the largest supported raw index type.
pub const MAX_INDEX_TYPE: i32 = 2;

impl IndexType {
    pub fn is_supported(raw: i32) -> bool {
        (0..MAX_INDEX_TYPE).contains(&raw)
    }

    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(IndexType::Hnsw),
            1 => Ok(IndexType::Flat),
            other => Err(AdapterError::UnsupportedIndex(other)),
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Construction parameters shared by every engine. Kept verbatim so an identical
/// engine can be rebuilt on deserialize.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineParams {
    pub dimension: usize,
    pub metric: Metric,
    pub max_degree: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub seed: Option<u64>,
}

/// Breadth/precision knobs for a single search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Candidate list size.
    pub ef: usize,
    /// Early-termination tolerance, relative to the current worst result.
    pub epsilon: f32,
}

/// Fixed-length search output. Slots past the last hit carry label `-1` and an
/// infinite distance; filled slots are always contiguous from index 0.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNeighbors {
    pub distances: Vec<f32>,
    pub labels: Vec<i64>,
}

impl RawNeighbors {
    /// Build a `k`-slot output from hits already sorted by ascending distance.
    pub fn from_sorted(k: usize, hits: impl IntoIterator<Item = (i64, f32)>) -> Self {
        let mut distances = Vec::with_capacity(k);
        let mut labels = Vec::with_capacity(k);
        for (label, distance) in hits.into_iter().take(k) {
            labels.push(label);
            distances.push(distance);
        }
        distances.resize(k, f32::INFINITY);
        labels.resize(k, -1);
        Self { distances, labels }
    }

    /// Number of valid results: one past the highest slot whose label is not `-1`.
    pub fn valid_len(&self) -> usize {
        self.labels
            .iter()
            .rposition(|&label| label != -1)
            .map_or(0, |i| i + 1)
    }
}

/// An approximate nearest neighbor engine the adapter delegates to.
pub trait AnnEngine: Send {
    fn dimension(&self) -> usize;

    fn metric(&self) -> Metric;

    /// Number of vectors held by the engine.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`AnnEngine::train`] must run before the first insert.
    fn requires_training(&self) -> bool {
        false
    }

    /// Fit any learned structure on a flat row-major batch.
    fn train(&mut self, _vectors: &[f32]) -> Result<()> {
        Ok(())
    }

    /// Insert a flat row-major batch with external labels. A failure aborts the batch.
    fn add_with_ids(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()>;

    /// Search for the `k` nearest neighbors of `query`.
    fn search(&self, query: &[f32], k: usize, params: &SearchParams) -> Result<RawNeighbors>;

    /// Write the engine's native binary image.
    fn write_image(&self, writer: &mut dyn IoWriter) -> Result<()>;

    /// Replace the engine's contents with an image produced by `write_image`.
    fn read_image(&mut self, reader: &mut dyn IoReader) -> Result<()>;
}

/// Construct an empty engine of the given type.
pub fn new_engine(index_type: IndexType, params: &EngineParams) -> Box<dyn AnnEngine> {
    match index_type {
        IndexType::Hnsw => Box::new(HnswEngine::new(params)),
        IndexType::Flat => Box::new(FlatEngine::new(params.dimension, params.metric)),
    }
}

static POOL_INIT: Once = Once::new();

/// Size the process-wide worker pool used by engines. Only the first call has effect.
pub fn configure_worker_threads(num_threads: usize) {
    POOL_INIT.call_once(|| {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("ann-worker-{i}"))
            .build_global()
        {
            Ok(()) => tracing::debug!(num_threads, "configured engine worker pool"),
            Err(e) => tracing::warn!("engine worker pool already initialized: {e}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_type_range() {
        assert!(IndexType::is_supported(0));
        assert!(IndexType::is_supported(1));
        assert!(!IndexType::is_supported(-1));
        assert!(!IndexType::is_supported(MAX_INDEX_TYPE));
        assert_eq!(IndexType::from_raw(0).unwrap(), IndexType::Hnsw);
        assert!(matches!(
            IndexType::from_raw(5),
            Err(AdapterError::UnsupportedIndex(5))
        ));
    }

    #[test]
    fn test_raw_neighbors_padding() {
        let raw = RawNeighbors::from_sorted(4, vec![(7, 0.0), (9, 1.5)]);
        assert_eq!(raw.labels, vec![7, 9, -1, -1]);
        assert_eq!(raw.distances[1], 1.5);
        assert!(raw.distances[3].is_infinite());
        assert_eq!(raw.valid_len(), 2);
    }

    #[test]
    fn test_raw_neighbors_truncates_to_k() {
        let raw = RawNeighbors::from_sorted(1, vec![(1, 0.1), (2, 0.2)]);
        assert_eq!(raw.labels, vec![1]);
        assert_eq!(raw.valid_len(), 1);
    }

    #[test]
    fn test_valid_len_empty() {
        let raw = RawNeighbors::from_sorted(3, Vec::new());
        assert_eq!(raw.valid_len(), 0);
    }
}
