//! Search policy, result sizing and the optional payload collaborator.

use std::collections::HashMap;

use crate::config::SearchTuning;
use crate::engine::{IndexType, RawNeighbors, SearchParams};

/// Which breadth/precision profile a search ran with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProfile {
    /// High-recall: looser termination, larger candidate list.
    Wide,
    /// Low-latency: tight termination, small candidate list.
    Narrow,
    /// The engine is exact; breadth knobs do not apply.
    Exhaustive,
}

/// How search parameters are chosen. Resolved once when the handle is created.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchPolicy {
    Adaptive { tuning: SearchTuning, ef_search: usize },
    Exhaustive,
}

impl SearchPolicy {
    pub fn for_index(index_type: IndexType, tuning: &SearchTuning, ef_search: usize) -> Self {
        match index_type {
            IndexType::Hnsw => SearchPolicy::Adaptive {
                tuning: tuning.clone(),
                ef_search,
            },
            IndexType::Flat => SearchPolicy::Exhaustive,
        }
    }

    /// Pick the profile and concrete knobs for a request of `topk` results.
    pub fn resolve(&self, topk: usize) -> (SearchProfile, SearchParams) {
        match self {
            SearchPolicy::Exhaustive => (
                SearchProfile::Exhaustive,
                SearchParams {
                    ef: topk,
                    epsilon: 0.0,
                },
            ),
            SearchPolicy::Adaptive { tuning, ef_search } => {
                if topk >= tuning.wide_topk_threshold {
                    let expanded = (topk as f64 * tuning.wide_expansion as f64).ceil() as usize;
                    (
                        SearchProfile::Wide,
                        SearchParams {
                            ef: expanded.max(*ef_search).max(topk),
                            epsilon: tuning.wide_epsilon,
                        },
                    )
                } else {
                    (
                        SearchProfile::Narrow,
                        SearchParams {
                            ef: topk.max(*ef_search).max(tuning.narrow_min_candidates),
                            epsilon: tuning.narrow_epsilon,
                        },
                    )
                }
            }
        }
    }
}

/// Search output owned by the caller. Both arrays hold exactly `len()` entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResult {
    pub distances: Vec<f32>,
    pub ids: Vec<i64>,
}

impl SearchResult {
    /// Keep the valid prefix of an engine's fixed-length output.
    pub fn from_raw(raw: RawNeighbors) -> Self {
        let size = raw.valid_len();
        let RawNeighbors {
            mut distances,
            mut labels,
        } = raw;
        distances.truncate(size);
        labels.truncate(size);
        Self {
            distances,
            ids: labels,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Search output plus one payload row per result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PayloadSearchResult {
    pub result: SearchResult,
    /// `None` where no payload is available for the id.
    pub rows: Vec<Option<Vec<u8>>>,
    pub row_length: u32,
}

/// External key→payload store consulted by payload-aware add and search.
pub trait PayloadStore: Send {
    fn put(&mut self, id: i64, row: &[u8]);

    fn get(&self, id: i64) -> Option<Vec<u8>>;
}

/// In-memory payload store.
#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    rows: HashMap<i64, Vec<u8>>,
}

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl PayloadStore for MemoryPayloadStore {
    fn put(&mut self, id: i64, row: &[u8]) {
        self.rows.insert(id, row.to_vec());
    }

    fn get(&self, id: i64) -> Option<Vec<u8>> {
        self.rows.get(&id).cloned()
    }
}
