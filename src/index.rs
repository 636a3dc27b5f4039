//! The index handle: buffered ingestion with a one-shot bulk build, flush-on-read,
//! topk-adaptive search and stream (de)serialization over a delegate engine.
//!
//! ```text
//!   create ──► add* ──► (pending + engine >= threshold) ──► Built ──► add* (direct)
//!                │                                                    │
//!                └── search / serialize: drain pending first ─────────┘
//! ```
//!
//! A handle is single-writer: nothing here is synchronized.

use std::io::{Read, Write};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::buffer::IngestBuffer;
use crate::config::AdapterConfig;
use crate::distance::Metric;
use crate::engine::{self, AnnEngine, EngineParams, IndexType};
use crate::error::{AdapterError, Result};
use crate::metrics::IndexStats;
use crate::search::{PayloadSearchResult, PayloadStore, SearchPolicy, SearchResult};
use crate::stream::{self, IoReader, IoWriter, StreamReader, StreamWriter};
use crate::vector::check_batch;

/// Magic bytes opening every serialized handle.
pub const IMAGE_MAGIC: [u8; 4] = *b"ANNX";
/// Current image format version.
pub const IMAGE_VERSION: u16 = 1;

/// Element types accepted by `create`.
const SUPPORTED_DTYPES: &[&str] = &["float32", "float"];

/// Ingestion mode of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// Inserts accumulate in the pending buffer.
    Buffering,
    /// The bulk build has happened; inserts go straight to the engine.
    Built,
    /// An engine call failed; only `deserialize` or drop can recover.
    Poisoned,
}

impl BuildState {
    fn to_byte(self) -> u8 {
        match self {
            BuildState::Buffering => 0,
            BuildState::Built => 1,
            BuildState::Poisoned => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(BuildState::Buffering),
            1 => Ok(BuildState::Built),
            other => Err(AdapterError::CorruptImage(format!(
                "invalid build state byte {other}"
            ))),
        }
    }
}

/// Construction parameters, reused verbatim when the handle is rebuilt on deserialize.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexParams {
    pub index_type: IndexType,
    pub dimension: usize,
    pub metric: Metric,
    pub max_degree: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl IndexParams {
    fn engine_params(&self, seed: Option<u64>) -> EngineParams {
        EngineParams {
            dimension: self.dimension,
            metric: self.metric,
            max_degree: self.max_degree,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            seed,
        }
    }
}

/// Per-index state object.
pub struct VectorIndexHandle {
    params: IndexParams,
    config: AdapterConfig,
    state: BuildState,
    pending: IngestBuffer,
    engine: Box<dyn AnnEngine>,
    policy: SearchPolicy,
    payloads: Option<Box<dyn PayloadStore>>,
    stats: IndexStats,
}

impl std::fmt::Debug for VectorIndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndexHandle")
            .field("params", &self.params)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("engine_len", &self.engine.len())
            .finish()
    }
}

impl VectorIndexHandle {
    /// Validate the raw creation arguments and build a handle with default configuration.
    pub fn create(
        index_type: i32,
        dtype: &str,
        metric: &str,
        dimension: usize,
        max_degree: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> Result<Self> {
        Self::create_with_config(
            index_type,
            dtype,
            metric,
            dimension,
            max_degree,
            ef_construction,
            ef_search,
            AdapterConfig::default(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_with_config(
        index_type: i32,
        dtype: &str,
        metric: &str,
        dimension: usize,
        max_degree: usize,
        ef_construction: usize,
        ef_search: usize,
        config: AdapterConfig,
    ) -> Result<Self> {
        if !SUPPORTED_DTYPES.contains(&dtype) {
            return Err(AdapterError::InvalidArgument(format!(
                "unsupported dtype: {dtype}"
            )));
        }
        let metric = Metric::parse(metric)?;
        let index_type = IndexType::from_raw(index_type)?;
        if dimension == 0 {
            return Err(AdapterError::InvalidArgument(
                "dimension must be positive".to_string(),
            ));
        }
        config.validate()?;

        let params = IndexParams {
            index_type,
            dimension,
            metric,
            max_degree,
            ef_construction,
            ef_search,
        };
        Ok(Self::new(params, config))
    }

    /// Build a handle from already-validated parameters.
    pub fn new(params: IndexParams, config: AdapterConfig) -> Self {
        engine::configure_worker_threads(config.num_threads);
        let engine = engine::new_engine(params.index_type, &params.engine_params(config.seed));
        Self::with_engine(params, config, engine)
    }

    /// Build a handle around a caller-supplied engine.
    pub fn with_engine(
        params: IndexParams,
        config: AdapterConfig,
        engine: Box<dyn AnnEngine>,
    ) -> Self {
        let pending = IngestBuffer::with_capacity(params.dimension, config.reserve_vectors());
        let policy = SearchPolicy::for_index(params.index_type, &config.search, params.ef_search);
        debug!(
            index_type = ?params.index_type,
            dimension = params.dimension,
            metric = params.metric.as_str(),
            "created index handle"
        );
        Self {
            params,
            config,
            state: BuildState::Buffering,
            pending,
            engine,
            policy,
            payloads: None,
            stats: IndexStats::new(),
        }
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.params.dimension
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn is_built(&self) -> bool {
        self.state == BuildState::Built
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Vectors waiting in the pending buffer.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Attach the key→payload collaborator used by the payload-aware calls.
    pub fn set_payload_store(&mut self, store: Box<dyn PayloadStore>) {
        self.payloads = Some(store);
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.state == BuildState::Poisoned {
            return Err(AdapterError::Poisoned);
        }
        Ok(())
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.params.dimension {
            return Err(AdapterError::DimensionMismatch {
                expected: self.params.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Record an engine failure by poisoning the handle.
    fn poison_on_err<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("engine call failed, handle is no longer usable: {e}");
            self.state = BuildState::Poisoned;
        }
        result
    }

    /// Train if needed, then hand the whole pending buffer to the engine.
    fn drain_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.engine.requires_training() {
            let trained = self.engine.train(self.pending.vectors());
            self.poison_on_err(trained)?;
        }
        let added = self
            .engine
            .add_with_ids(self.pending.vectors(), self.pending.ids());
        self.poison_on_err(added)?;
        self.pending.clear();
        Ok(())
    }

    /// The one-shot Buffering → Built transition.
    fn bulk_build(&mut self) -> Result<()> {
        let started = Instant::now();
        let pending = self.pending.len();
        self.drain_pending()?;
        self.pending.release();
        self.state = BuildState::Built;
        self.stats.record_bulk_build();
        info!(
            vectors = pending,
            total = self.engine.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk build complete"
        );
        Ok(())
    }

    /// Make buffered vectors visible to readers without changing the build state.
    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = self.pending.len();
        self.drain_pending()?;
        self.stats.record_flush();
        debug!(vectors = pending, "flushed pending buffer");
        Ok(())
    }

    /// Add `ids.len()` vectors given as one row-major slice.
    pub fn add(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        self.ensure_usable()?;
        check_batch(vectors, ids.len(), self.params.dimension)?;
        if ids.is_empty() {
            return Ok(());
        }

        match self.state {
            BuildState::Buffering => {
                self.pending.push_batch(vectors, ids)?;
                self.stats.record_add(ids.len());
                if self.pending.len() + self.engine.len() >= self.config.build_threshold {
                    self.bulk_build()?;
                }
            }
            BuildState::Built => {
                let added = self.engine.add_with_ids(vectors, ids);
                self.poison_on_err(added)?;
                self.stats.record_add(ids.len());
            }
            BuildState::Poisoned => return Err(AdapterError::Poisoned),
        }
        Ok(())
    }

    /// Build the index from `vectors` in one step, together with anything still
    /// buffered. A buffering handle becomes `Built` even when the batch is
    /// empty; on a built handle this is a plain add.
    pub fn build(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        self.ensure_usable()?;
        check_batch(vectors, ids.len(), self.params.dimension)?;

        match self.state {
            BuildState::Buffering => {
                if !ids.is_empty() {
                    self.pending.push_batch(vectors, ids)?;
                    self.stats.record_add(ids.len());
                }
                self.bulk_build()
            }
            BuildState::Built => {
                if ids.is_empty() {
                    return Ok(());
                }
                let added = self.engine.add_with_ids(vectors, ids);
                self.poison_on_err(added)?;
                self.stats.record_add(ids.len());
                Ok(())
            }
            BuildState::Poisoned => Err(AdapterError::Poisoned),
        }
    }

    /// Add vectors with one fixed-length payload row per vector.
    pub fn add_with_payload(
        &mut self,
        vectors: &[f32],
        ids: &[i64],
        payload: &[u8],
        row_length: usize,
    ) -> Result<()> {
        if payload.len() != ids.len().saturating_mul(row_length) {
            return Err(AdapterError::InvalidArgument(format!(
                "payload of {} bytes does not hold {} rows of {} bytes",
                payload.len(),
                ids.len(),
                row_length
            )));
        }
        self.add(vectors, ids)?;

        match self.payloads.as_mut() {
            Some(store) if row_length > 0 => {
                for (&id, row) in ids.iter().zip(payload.chunks_exact(row_length)) {
                    store.put(id, row);
                }
            }
            Some(_) => {}
            None => debug!(rows = ids.len(), "no payload store attached, payload dropped"),
        }
        Ok(())
    }

    /// Total vectors visible to the handle, buffered or built.
    pub fn get_index_number(&self) -> Result<usize> {
        self.ensure_usable()?;
        Ok(self.pending.len() + self.engine.len())
    }

    /// Find the `topk` nearest neighbors of `query`. Buffered vectors are flushed first.
    pub fn search(&mut self, query: &[f32], topk: usize) -> Result<SearchResult> {
        self.ensure_usable()?;
        self.check_dimension(query.len())?;
        if topk == 0 {
            return Err(AdapterError::InvalidArgument(
                "topk must be positive".to_string(),
            ));
        }

        let started = Instant::now();
        self.flush()?;

        let (profile, params) = self.policy.resolve(topk);
        debug!(?profile, topk, ef = params.ef, epsilon = params.epsilon, "search");

        // Results never exceed the stored count.
        let slots = topk.min(self.engine.len()).max(1);
        let raw = self.engine.search(query, slots, &params);
        let raw = self.poison_on_err(raw)?;
        self.stats.record_search(started.elapsed());
        Ok(SearchResult::from_raw(raw))
    }

    /// Search and attach one payload row per result, padded or cut to the
    /// configured row length. Rows are `None` when no payload is known.
    pub fn search_with_payload(&mut self, query: &[f32], topk: usize) -> Result<PayloadSearchResult> {
        let result = self.search(query, topk)?;
        let row_length = self.config.payload_row_length;
        let rows = result
            .ids
            .iter()
            .map(|&id| {
                self.payloads
                    .as_ref()
                    .and_then(|store| store.get(id))
                    .map(|mut row| {
                        row.resize(row_length as usize, 0);
                        row
                    })
            })
            .collect();
        Ok(PayloadSearchResult {
            result,
            rows,
            row_length,
        })
    }

    /// Flush, then write the handle header and the engine's native image.
    pub fn serialize(&mut self, writer: &mut dyn IoWriter) -> Result<()> {
        self.ensure_usable()?;
        self.flush()?;

        let mut header = Vec::with_capacity(8);
        header.extend_from_slice(&IMAGE_MAGIC);
        header.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        header.push(self.params.index_type.as_raw() as u8);
        header.push(self.state.to_byte());
        stream::write_all(writer, &header)?;

        self.engine.write_image(writer)
    }

    /// Serialize into any `std::io::Write`.
    pub fn serialize_to<W: Write>(&mut self, out: W) -> Result<W> {
        let mut writer = StreamWriter::new(out);
        self.serialize(&mut writer)?;
        Ok(writer.into_inner()?)
    }

    pub fn serialize_to_vec(&mut self) -> Result<Vec<u8>> {
        self.serialize_to(Vec::new())
    }

    /// Replace this handle with a fresh one built from the same parameters and
    /// loaded from `reader`. On failure the current handle is left as it was.
    pub fn deserialize(&mut self, reader: &mut dyn IoReader) -> Result<()> {
        let mut header = [0u8; 8];
        stream::read_exact(reader, &mut header)?;
        if header[..4] != IMAGE_MAGIC {
            return Err(AdapterError::CorruptImage("bad magic".to_string()));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != IMAGE_VERSION {
            return Err(AdapterError::CorruptImage(format!(
                "unsupported image version {version}"
            )));
        }
        if header[6] as i32 != self.params.index_type.as_raw() {
            return Err(AdapterError::CorruptImage(format!(
                "image holds index type {}, handle expects {}",
                header[6],
                self.params.index_type.as_raw()
            )));
        }
        let state = BuildState::from_byte(header[7])?;

        let mut fresh = Self::new(self.params.clone(), self.config.clone());
        fresh.engine.read_image(reader)?;
        if fresh.engine.dimension() != self.params.dimension
            || fresh.engine.metric() != self.params.metric
        {
            return Err(AdapterError::CorruptImage(format!(
                "image is {}-d {}, handle expects {}-d {}",
                fresh.engine.dimension(),
                fresh.engine.metric().as_str(),
                self.params.dimension,
                self.params.metric.as_str()
            )));
        }
        fresh.state = state;
        if state == BuildState::Built {
            fresh.pending.release();
        }
        fresh.payloads = self.payloads.take();

        info!(
            vectors = fresh.engine.len(),
            state = ?fresh.state,
            "deserialized index handle"
        );
        *self = fresh;
        Ok(())
    }

    /// Deserialize from any `std::io::Read`.
    pub fn deserialize_from<R: Read>(&mut self, input: R) -> Result<()> {
        let mut reader = StreamReader::new(input);
        self.deserialize(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RawNeighbors, SearchParams};
    use crate::search::MemoryPayloadStore;
    use std::sync::{Arc, Mutex};

    fn params(dimension: usize) -> IndexParams {
        IndexParams {
            index_type: IndexType::Hnsw,
            dimension,
            metric: Metric::L2,
            max_degree: 8,
            ef_construction: 64,
            ef_search: 16,
        }
    }

    fn small(threshold: usize) -> AdapterConfig {
        AdapterConfig::default()
            .with_build_threshold(threshold)
            .with_seed(3)
    }

    #[derive(Default)]
    struct Calls {
        trains: usize,
        adds: Vec<usize>,
        searches: usize,
        ks: Vec<usize>,
    }

    /// Records calls; fails every call once `fail` is set.
    struct RecordingEngine {
        dimension: usize,
        needs_training: bool,
        stored: usize,
        fail: bool,
        calls: Arc<Mutex<Calls>>,
    }

    impl AnnEngine for RecordingEngine {
        fn dimension(&self) -> usize {
            self.dimension
        }
        fn metric(&self) -> Metric {
            Metric::L2
        }
        fn len(&self) -> usize {
            self.stored
        }
        fn requires_training(&self) -> bool {
            self.needs_training
        }
        fn train(&mut self, _vectors: &[f32]) -> Result<()> {
            self.calls.lock().unwrap().trains += 1;
            self.needs_training = false;
            Ok(())
        }
        fn add_with_ids(&mut self, _vectors: &[f32], ids: &[i64]) -> Result<()> {
            if self.fail {
                return Err(AdapterError::Engine("insert failed".to_string()));
            }
            self.calls.lock().unwrap().adds.push(ids.len());
            self.stored += ids.len();
            Ok(())
        }
        fn search(&self, _query: &[f32], k: usize, _params: &SearchParams) -> Result<RawNeighbors> {
            if self.fail {
                return Err(AdapterError::Engine("search failed".to_string()));
            }
            let mut calls = self.calls.lock().unwrap();
            calls.searches += 1;
            calls.ks.push(k);
            Ok(RawNeighbors::from_sorted(k, Vec::new()))
        }
        fn write_image(&self, _writer: &mut dyn IoWriter) -> Result<()> {
            Ok(())
        }
        fn read_image(&mut self, _reader: &mut dyn IoReader) -> Result<()> {
            Ok(())
        }
    }

    fn recording(threshold: usize, needs_training: bool) -> (VectorIndexHandle, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let engine = RecordingEngine {
            dimension: 2,
            needs_training,
            stored: 0,
            fail: false,
            calls: Arc::clone(&calls),
        };
        let handle = VectorIndexHandle::with_engine(params(2), small(threshold), Box::new(engine));
        (handle, calls)
    }

    #[test]
    fn test_create_validates_arguments() {
        assert!(VectorIndexHandle::create(0, "float32", "l2", 4, 8, 64, 16).is_ok());
        assert!(VectorIndexHandle::create(1, "float32", "ip", 4, 8, 64, 16).is_ok());

        let err = VectorIndexHandle::create(0, "float32", "cosine", 4, 8, 64, 16).unwrap_err();
        assert_eq!(err.code(), 3);
        let err = VectorIndexHandle::create(0, "int8", "l2", 4, 8, 64, 16).unwrap_err();
        assert_eq!(err.code(), 3);
        let err = VectorIndexHandle::create(9, "float32", "l2", 4, 8, 64, 16).unwrap_err();
        assert_eq!(err.code(), 6);
        let err = VectorIndexHandle::create(-1, "float32", "l2", 4, 8, 64, 16).unwrap_err();
        assert_eq!(err.code(), 6);
        assert!(VectorIndexHandle::create(0, "float32", "l2", 0, 8, 64, 16).is_err());
    }

    #[test]
    fn test_buffers_below_threshold() {
        let (mut handle, calls) = recording(10, false);
        handle.add(&[0.0; 8], &[1, 2, 3, 4]).unwrap();
        handle.add(&[0.0; 4], &[5, 6]).unwrap();

        assert_eq!(handle.get_index_number().unwrap(), 6);
        assert_eq!(handle.pending_len(), 6);
        assert!(!handle.is_built());
        assert!(calls.lock().unwrap().adds.is_empty());
    }

    #[test]
    fn test_threshold_triggers_exactly_one_build() {
        let (mut handle, calls) = recording(4, false);
        handle.add(&[0.0; 6], &[1, 2, 3]).unwrap();
        handle.add(&[0.0; 4], &[4, 5]).unwrap();

        assert!(handle.is_built());
        assert_eq!(handle.pending_len(), 0);
        assert_eq!(calls.lock().unwrap().adds, vec![5]);

        handle.add(&[0.0; 2], &[6]).unwrap();
        handle.add(&[0.0; 2], &[7]).unwrap();
        assert!(handle.is_built());
        assert_eq!(handle.pending_len(), 0);
        assert_eq!(calls.lock().unwrap().adds, vec![5, 1, 1]);
        assert_eq!(handle.stats().bulk_builds(), 1);
        assert_eq!(handle.get_index_number().unwrap(), 7);
    }

    #[test]
    fn test_training_runs_once_when_required() {
        let (mut handle, calls) = recording(2, true);
        handle.add(&[0.0; 4], &[1, 2]).unwrap();
        handle.add(&[0.0; 2], &[3]).unwrap();
        assert_eq!(calls.lock().unwrap().trains, 1);

        let (mut handle, calls) = recording(2, false);
        handle.add(&[0.0; 4], &[1, 2]).unwrap();
        assert_eq!(calls.lock().unwrap().trains, 0);
    }

    #[test]
    fn test_search_flushes_without_building() {
        let (mut handle, calls) = recording(100, false);
        handle.add(&[0.0; 6], &[1, 2, 3]).unwrap();
        handle.search(&[0.0, 0.0], 3).unwrap();

        assert_eq!(handle.pending_len(), 0);
        assert!(!handle.is_built());
        assert_eq!(calls.lock().unwrap().adds, vec![3]);
        assert_eq!(handle.stats().flushes(), 1);

        // A second search has nothing to flush.
        handle.search(&[0.0, 0.0], 3).unwrap();
        assert_eq!(handle.stats().flushes(), 1);
        assert_eq!(calls.lock().unwrap().searches, 2);
    }

    #[test]
    fn test_huge_topk_is_clamped_to_stored_count() {
        let (mut handle, calls) = recording(100, false);
        handle.add(&[0.0; 6], &[1, 2, 3]).unwrap();
        handle.search(&[0.0, 0.0], 50_000_000).unwrap();
        assert_eq!(calls.lock().unwrap().ks, vec![3]);

        // An empty index still asks for one slot.
        let (mut empty, calls) = recording(100, false);
        let result = empty.search(&[0.0, 0.0], usize::MAX).unwrap();
        assert!(result.is_empty());
        assert_eq!(calls.lock().unwrap().ks, vec![1]);
    }

    #[test]
    fn test_huge_topk_on_real_engines() {
        for index_type in [IndexType::Hnsw, IndexType::Flat] {
            let mut handle = VectorIndexHandle::new(
                IndexParams {
                    index_type,
                    ..params(2)
                },
                small(100),
            );
            handle.add(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0], &[1, 2, 3]).unwrap();
            let result = handle.search(&[0.0, 0.0], 1 << 40).unwrap();
            assert_eq!(result.len(), 3);
            assert_eq!(result.ids[0], 1);
        }
    }

    #[test]
    fn test_explicit_build_flips_state_once() {
        let (mut handle, calls) = recording(5, false);
        handle.add(&[0.0; 4], &[1, 2]).unwrap();
        handle.build(&[0.0; 2], &[3]).unwrap();

        assert!(handle.is_built());
        assert_eq!(handle.pending_len(), 0);
        assert_eq!(calls.lock().unwrap().adds, vec![3]);
        assert_eq!(handle.stats().bulk_builds(), 1);

        // Crossing the threshold afterwards does not build again.
        handle.add(&[0.0; 6], &[4, 5, 6]).unwrap();
        handle.build(&[0.0; 2], &[7]).unwrap();
        assert_eq!(handle.stats().bulk_builds(), 1);
        assert_eq!(calls.lock().unwrap().adds, vec![3, 3, 1]);
        assert_eq!(handle.get_index_number().unwrap(), 7);
    }

    #[test]
    fn test_explicit_build_with_empty_batch() {
        let (mut handle, calls) = recording(100, false);
        handle.build(&[], &[]).unwrap();
        assert!(handle.is_built());
        assert!(calls.lock().unwrap().adds.is_empty());

        let (mut handle, _calls) = recording(100, false);
        assert!(matches!(
            handle.build(&[0.0; 3], &[1, 2]),
            Err(AdapterError::DimensionMismatch { .. }) | Err(AdapterError::InvalidArgument(_))
        ));
        assert_eq!(handle.state(), BuildState::Buffering);
    }

    #[test]
    fn test_flushed_vectors_count_toward_threshold() {
        let (mut handle, _calls) = recording(4, false);
        handle.add(&[0.0; 6], &[1, 2, 3]).unwrap();
        handle.search(&[0.0, 0.0], 1).unwrap();
        assert!(!handle.is_built());

        handle.add(&[0.0; 2], &[4]).unwrap();
        assert!(handle.is_built());
        assert_eq!(handle.stats().bulk_builds(), 1);
    }

    #[test]
    fn test_engine_failure_poisons_handle() {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let engine = RecordingEngine {
            dimension: 2,
            needs_training: false,
            stored: 0,
            fail: true,
            calls,
        };
        let mut handle = VectorIndexHandle::with_engine(params(2), small(2), Box::new(engine));
        let err = handle.add(&[0.0; 4], &[1, 2]).unwrap_err();
        assert_eq!(err.code(), 1);
        assert_eq!(handle.state(), BuildState::Poisoned);

        assert!(matches!(handle.add(&[0.0; 2], &[3]), Err(AdapterError::Poisoned)));
        assert!(matches!(handle.search(&[0.0, 0.0], 1), Err(AdapterError::Poisoned)));
        assert!(matches!(handle.get_index_number(), Err(AdapterError::Poisoned)));
    }

    #[test]
    fn test_argument_errors_do_not_poison() {
        let (mut handle, _calls) = recording(10, false);
        assert!(handle.add(&[0.0; 3], &[1, 2]).is_err());
        assert!(matches!(
            handle.search(&[0.0; 3], 1),
            Err(AdapterError::DimensionMismatch { .. })
        ));
        assert!(handle.search(&[0.0; 2], 0).is_err());
        assert_eq!(handle.state(), BuildState::Buffering);
    }

    #[test]
    fn test_hnsw_handle_end_to_end() {
        let mut handle = VectorIndexHandle::new(params(2), small(1_000));
        handle
            .add(&[1.0, 1.0, 5.0, 5.0, -3.0, 2.0], &[10, 20, 30])
            .unwrap();
        let result = handle.search(&[5.0, 5.0], 3).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.ids[0], 20);
        assert!(result.distances[0] < 1e-6);
    }

    #[test]
    fn test_serialize_roundtrip_keeps_state() {
        let mut handle = VectorIndexHandle::new(params(2), small(3));
        handle.add(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0], &[1, 2, 3]).unwrap();
        assert!(handle.is_built());
        let bytes = handle.serialize_to_vec().unwrap();

        let mut restored = VectorIndexHandle::new(params(2), small(3));
        restored.deserialize_from(bytes.as_slice()).unwrap();
        assert!(restored.is_built());
        assert_eq!(restored.get_index_number().unwrap(), 3);

        let mut buffering = VectorIndexHandle::new(params(2), small(100));
        buffering.add(&[0.0, 0.0], &[1]).unwrap();
        let bytes = buffering.serialize_to_vec().unwrap();
        let mut restored = VectorIndexHandle::new(params(2), small(100));
        restored.deserialize_from(bytes.as_slice()).unwrap();
        assert!(!restored.is_built());
        assert_eq!(restored.get_index_number().unwrap(), 1);
    }

    #[test]
    fn test_deserialize_rejects_mismatched_handle() {
        let mut handle = VectorIndexHandle::new(params(2), small(100));
        handle.add(&[0.0, 0.0], &[1]).unwrap();
        let bytes = handle.serialize_to_vec().unwrap();

        let mut other = VectorIndexHandle::new(params(3), small(100));
        other.add(&[1.0, 1.0, 1.0], &[9]).unwrap();
        assert!(other.deserialize_from(bytes.as_slice()).is_err());
        // Failed deserialize leaves the handle as it was.
        assert_eq!(other.get_index_number().unwrap(), 1);
        assert_eq!(other.dimension(), 3);

        let mut flat = VectorIndexHandle::new(
            IndexParams {
                index_type: IndexType::Flat,
                ..params(2)
            },
            small(100),
        );
        assert!(matches!(
            flat.deserialize_from(bytes.as_slice()),
            Err(AdapterError::CorruptImage(_))
        ));
        assert!(handle.deserialize_from(&b"XXXXjunk"[..]).is_err());
    }

    #[test]
    fn test_payload_rows() {
        let mut handle = VectorIndexHandle::new(params(2), small(100));
        handle.set_payload_store(Box::new(MemoryPayloadStore::new()));
        handle
            .add_with_payload(&[0.0, 0.0, 9.0, 9.0], &[1, 2], b"aaabbb", 3)
            .unwrap();

        let found = handle.search_with_payload(&[0.0, 0.0], 2).unwrap();
        assert_eq!(found.result.ids, vec![1, 2]);
        assert_eq!(found.row_length, 500);
        let first = found.rows[0].as_ref().unwrap();
        assert_eq!(first.len(), 500);
        assert_eq!(&first[..3], b"aaa");

        assert!(handle
            .add_with_payload(&[0.0, 0.0], &[3], b"toolong", 3)
            .is_err());
    }

    #[test]
    fn test_payload_placeholders_without_store() {
        let mut handle = VectorIndexHandle::new(params(2), small(100));
        handle
            .add_with_payload(&[0.0, 0.0], &[1], b"abc", 3)
            .unwrap();
        let found = handle.search_with_payload(&[0.0, 0.0], 1).unwrap();
        assert_eq!(found.rows, vec![None]);
    }
}
