//! Directory-based persistence: one image file per index directory.

use crate::config::AdapterConfig;
use crate::error::{AdapterError, Result};
use crate::index::{IndexParams, VectorIndexHandle};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the index image inside its directory.
pub const INDEX_FILE_NAME: &str = "hnsw.data";

/// Human-readable creation parameters written next to the image.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Path of the image file for `dir`.
pub fn index_path(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(INDEX_FILE_NAME)
}

/// Everything needed to recreate a compatible handle before loading its image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub index_type: i32,
    pub dtype: String,
    pub metric: String,
    pub dimension: usize,
    pub max_degree: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub vector_count: usize,
    pub built: bool,
    pub version: String,
}

impl IndexManifest {
    pub fn from_handle(handle: &VectorIndexHandle) -> Result<Self> {
        let params = handle.params();
        Ok(Self {
            index_type: params.index_type.as_raw(),
            dtype: "float32".to_string(),
            metric: params.metric.as_str().to_string(),
            dimension: params.dimension,
            max_degree: params.max_degree,
            ef_construction: params.ef_construction,
            ef_search: params.ef_search,
            vector_count: handle.get_index_number()?,
            built: handle.is_built(),
            version: crate::logging::version().to_string(),
        })
    }

    /// Create an empty handle with the recorded parameters.
    pub fn new_handle(&self, config: AdapterConfig) -> Result<VectorIndexHandle> {
        VectorIndexHandle::create_with_config(
            self.index_type,
            &self.dtype,
            &self.metric,
            self.dimension,
            self.max_degree,
            self.ef_construction,
            self.ef_search,
            config,
        )
    }

    pub fn matches(&self, params: &IndexParams) -> bool {
        self.index_type == params.index_type.as_raw()
            && self.metric == params.metric.as_str()
            && self.dimension == params.dimension
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| AdapterError::SerializationError(e.to_string()))?;
        fs::write(dir.as_ref().join(MANIFEST_FILE_NAME), bytes)?;
        Ok(())
    }

    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(dir.as_ref().join(MANIFEST_FILE_NAME))?;
        serde_json::from_slice(&bytes).map_err(|e| AdapterError::SerializationError(e.to_string()))
    }
}

/// Serialize `handle` into `<dir>/hnsw.data`, creating `dir` if needed.
pub fn serialize_to_dir(handle: &mut VectorIndexHandle, dir: impl AsRef<Path>) -> Result<PathBuf> {
    fs::create_dir_all(dir.as_ref())?;
    let path = index_path(dir);
    let file = File::create(&path)?;
    let file = handle.serialize_to(BufWriter::new(file))?;
    file.get_ref().sync_all()?;

    info!(path = %path.display(), "wrote index image");
    Ok(path)
}

/// Replace `handle` with the image stored in `<dir>/hnsw.data`.
///
/// The file is memory-mapped; if mapping fails it is read through a buffered reader.
pub fn deserialize_from_dir(handle: &mut VectorIndexHandle, dir: impl AsRef<Path>) -> Result<()> {
    let path = index_path(dir);
    let file = File::open(&path)?;

    // SAFETY: the map is read-only and dropped before returning; the image file is
    // not expected to be modified while it is being loaded.
    match unsafe { memmap2::Mmap::map(&file) } {
        Ok(mmap) => handle.deserialize_from(&mmap[..])?,
        Err(e) => {
            debug!("mmap of {} failed ({e}), using buffered reads", path.display());
            handle.deserialize_from(BufReader::new(file))?;
        }
    }

    info!(path = %path.display(), "loaded index image");
    Ok(())
}
