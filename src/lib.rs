//! # ann_adapter
//!
//! An adapter that sits between a caller and an approximate nearest neighbor engine.
//!
//! This library provides:
//! - A staging buffer that defers index construction until enough vectors have
//!   arrived, then performs a single bulk build
//! - Flush-on-read, so searches and serialization always see every added vector
//! - Search parameters chosen by requested result count (wide vs. narrow)
//! - Stream serialization of the engine image through byte-counting callbacks
//! - A C ABI with integer error codes (see [`ffi`])
//!
//! ## Example
//!
//! ```rust
//! use ann_adapter::{AdapterConfig, VectorIndexHandle};
//!
//! let config = AdapterConfig::default().with_build_threshold(1_000);
//! let mut index =
//!     VectorIndexHandle::create_with_config(0, "float32", "l2", 2, 16, 64, 32, config).unwrap();
//!
//! index.add(&[1.0, 1.0, 4.0, 4.0], &[10001, 10002]).unwrap();
//! assert_eq!(index.get_index_number().unwrap(), 2);
//!
//! let result = index.search(&[1.0, 1.0], 1).unwrap();
//! assert_eq!(result.ids, vec![10001]);
//! ```

pub mod buffer;
pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod index;
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod search;
pub mod stream;
pub mod vector;

pub use config::{AdapterConfig, SearchTuning};
pub use distance::Metric;
pub use engine::{AnnEngine, IndexType};
pub use error::{AdapterError, ErrorCode, Result};
pub use index::{BuildState, IndexParams, VectorIndexHandle};
pub use metrics::IndexStats;
pub use search::{MemoryPayloadStore, PayloadStore, SearchProfile, SearchResult};
pub use stream::{IoReader, IoWriter, StreamReader, StreamWriter};
pub use vector::Vector;
