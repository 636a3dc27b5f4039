//! Owned vector type and helpers for the flat row-major batches used at the API boundary.

use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};

/// A vector in n-dimensional space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Parse a vector from a comma-separated string
    pub fn from_str(s: &str) -> Result<Self> {
        let data: Result<Vec<f32>> = s
            .split(',')
            .map(|x| {
                x.trim().parse::<f32>().map_err(|_| {
                    AdapterError::InvalidArgument(format!("invalid float: {}", x))
                })
            })
            .collect();
        Ok(Vector::new(data?))
    }
}

/// Check that a flat batch holds exactly `count` rows of `dim` floats.
pub fn check_batch(vectors: &[f32], count: usize, dim: usize) -> Result<()> {
    let expected = count.checked_mul(dim).ok_or_else(|| {
        AdapterError::InvalidArgument(format!("batch of {count} x {dim} overflows"))
    })?;
    if vectors.len() != expected {
        return Err(AdapterError::InvalidArgument(format!(
            "expected {} floats for {} vectors of dimension {}, got {}",
            expected,
            count,
            dim,
            vectors.len()
        )));
    }
    Ok(())
}
