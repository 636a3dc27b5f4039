//! Distance metrics for vector similarity

use crate::error::{AdapterError, Result};
use serde::{Deserialize, Serialize};

/// Distance metrics supported by the engines. Smaller is always closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Euclidean (L2) distance
    L2,
    /// Inner product (negated so that the best match has the smallest value)
    InnerProduct,
}

impl Metric {
    /// Parse the metric names accepted by `create_index`.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "l2" => Ok(Metric::L2),
            "ip" => Ok(Metric::InnerProduct),
            other => Err(AdapterError::InvalidArgument(format!(
                "unsupported metric: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::InnerProduct => "ip",
        }
    }

    /// Compute the distance between two vectors using this metric
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(AdapterError::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(self.distance_unchecked(a, b))
    }

    /// Distance for slices already known to share a dimension.
    pub(crate) fn distance_unchecked(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => euclidean_distance(a, b),
            Metric::InnerProduct => -dot_product(a, b),
        }
    }
}

/// Compute Euclidean (L2) distance between two vectors
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Compute dot product of two vectors
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse() {
        assert_eq!(Metric::parse("l2").unwrap(), Metric::L2);
        assert_eq!(Metric::parse("ip").unwrap(), Metric::InnerProduct);
        assert!(matches!(
            Metric::parse("cosine"),
            Err(AdapterError::InvalidArgument(_))
        ));
        assert!(Metric::parse("L2").is_err());
    }

    #[test]
    fn test_euclidean_distance() {
        let dist = euclidean_distance(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]);
        assert_relative_eq!(dist, 5.196152, epsilon = 1e-5);
    }

    #[test]
    fn test_euclidean_same_vector() {
        let v = [1.0, 2.0, 3.0];
        assert_relative_eq!(euclidean_distance(&v, &v), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_inner_product_is_negated() {
        let dist = Metric::InnerProduct
            .distance(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0])
            .unwrap();
        assert_relative_eq!(dist, -32.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(matches!(
            Metric::L2.distance(&[1.0, 2.0], &[1.0, 2.0, 3.0]),
            Err(AdapterError::DimensionMismatch { .. })
        ));
    }
}
