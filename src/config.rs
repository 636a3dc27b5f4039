//! Adapter configuration: build threshold, buffer reservation, worker threads and
//! search tuning. Loadable from JSON; every field has a default.

use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of vectors that triggers the one-shot bulk build.
pub const DEFAULT_BUILD_THRESHOLD: usize = 1_000_000;

/// Default payload row length handed back by payload-aware search.
pub const DEFAULT_PAYLOAD_ROW_LENGTH: u32 = 500;

/// Search breadth/precision constants for the adaptive policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchTuning {
    /// Requests with `topk` at or above this use the wide profile.
    pub wide_topk_threshold: usize,
    /// Early-termination tolerance for wide searches.
    pub wide_epsilon: f32,
    /// Candidate list size as a multiple of `topk` for wide searches.
    pub wide_expansion: f32,
    /// Early-termination tolerance for narrow searches.
    pub narrow_epsilon: f32,
    /// Candidate list floor for narrow searches.
    pub narrow_min_candidates: usize,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            wide_topk_threshold: 10_000,
            wide_epsilon: 0.1,
            wide_expansion: 1.5,
            narrow_epsilon: 0.02,
            narrow_min_candidates: 15,
        }
    }
}

/// Configuration for an index handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Cumulative vector count at which the bulk build fires.
    pub build_threshold: usize,
    /// Vectors reserved in the pending buffer at creation time.
    pub initial_reserve: usize,
    /// Size of the process-wide worker pool used by engines.
    pub num_threads: usize,
    /// Seed for graph level generation. `None` draws from entropy.
    pub seed: Option<u64>,
    /// Uniform row length for payload-aware search results.
    pub payload_row_length: u32,
    pub search: SearchTuning,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            build_threshold: DEFAULT_BUILD_THRESHOLD,
            initial_reserve: 65_536,
            num_threads: 6,
            seed: None,
            payload_row_length: DEFAULT_PAYLOAD_ROW_LENGTH,
            search: SearchTuning::default(),
        }
    }
}

impl AdapterConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: AdapterConfig = serde_json::from_slice(bytes)
            .map_err(|e| AdapterError::SerializationError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the build threshold.
    pub fn with_build_threshold(mut self, threshold: usize) -> Self {
        self.build_threshold = threshold;
        self
    }

    /// Set the level-generation seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Vectors to reserve up front, never more than the threshold.
    pub fn reserve_vectors(&self) -> usize {
        self.initial_reserve.min(self.build_threshold)
    }

    pub fn validate(&self) -> Result<()> {
        if self.build_threshold == 0 {
            return Err(AdapterError::InvalidArgument(
                "build_threshold must be positive".to_string(),
            ));
        }
        if self.num_threads == 0 {
            return Err(AdapterError::InvalidArgument(
                "num_threads must be positive".to_string(),
            ));
        }
        if self.search.wide_expansion < 1.0 {
            return Err(AdapterError::InvalidArgument(
                "wide_expansion must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
