//! HNSW (Hierarchical Navigable Small World) engine.

pub mod graph;
pub mod neighbor_queue;

pub use graph::{HnswGraph, HnswParams};

use crate::distance::Metric;
use crate::error::{AdapterError, Result};
use crate::stream::{self, IoReader, IoWriter};
use crate::vector::{check_batch, Vector};

use super::{AnnEngine, EngineParams, RawNeighbors, SearchParams, MAX_IMAGE_FRAME};

/// Graph-based approximate engine. Does not require training.
#[derive(Debug)]
pub struct HnswEngine {
    graph: HnswGraph,
}

impl HnswEngine {
    /// Create an empty engine with defaults tuned for the requested metric.
    pub fn new(params: &EngineParams) -> Self {
        let hnsw = HnswParams::for_metric(
            params.metric,
            params.max_degree,
            params.ef_construction,
            params.ef_search,
        )
        .with_seed(params.seed);
        Self::with_params(params.dimension, params.metric, hnsw)
    }

    pub fn with_params(dimension: usize, metric: Metric, params: HnswParams) -> Self {
        Self {
            graph: HnswGraph::new(dimension, metric, params),
        }
    }
}

impl AnnEngine for HnswEngine {
    fn dimension(&self) -> usize {
        self.graph.dimension()
    }

    fn metric(&self) -> Metric {
        self.graph.metric()
    }

    fn len(&self) -> usize {
        self.graph.len()
    }

    /// Vectors are inserted sequentially; the graph depends on insertion order.
    fn add_with_ids(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        let dim = self.graph.dimension();
        check_batch(vectors, ids.len(), dim)?;
        for (row, &label) in vectors.chunks_exact(dim).zip(ids) {
            self.graph.insert(label, Vector::new(row.to_vec()))?;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, params: &SearchParams) -> Result<RawNeighbors> {
        let hits = self.graph.search_knn(query, k, params.ef, params.epsilon)?;
        let labelled = hits
            .into_iter()
            .map(|n| {
                self.graph
                    .label(n.id)
                    .map(|label| (label, n.distance))
                    .ok_or_else(|| AdapterError::Engine(format!("dangling node id {}", n.id)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RawNeighbors::from_sorted(k, labelled))
    }

    fn write_image(&self, writer: &mut dyn IoWriter) -> Result<()> {
        let bytes = self.graph.to_bytes()?;
        stream::write_frame(writer, &bytes)
    }

    fn read_image(&mut self, reader: &mut dyn IoReader) -> Result<()> {
        let bytes = stream::read_frame(reader, MAX_IMAGE_FRAME)?;
        self.graph = HnswGraph::from_bytes(&bytes)?;
        Ok(())
    }
}
