//! Staging buffer for vectors that have not yet been handed to the engine.

use crate::error::Result;
use crate::vector::check_batch;

/// Ordered pending vectors and their external ids.
///
/// Invariant: `vectors.len() == ids.len() * dimension` after every public call.
#[derive(Debug)]
pub struct IngestBuffer {
    dimension: usize,
    vectors: Vec<f32>,
    ids: Vec<i64>,
}

impl IngestBuffer {
    /// Create a buffer with room for `reserve` vectors.
    pub fn with_capacity(dimension: usize, reserve: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::with_capacity(reserve.saturating_mul(dimension)),
            ids: Vec::with_capacity(reserve),
        }
    }

    /// Append a flat batch. The whole batch is rejected if its shape is wrong.
    pub fn push_batch(&mut self, vectors: &[f32], ids: &[i64]) -> Result<()> {
        check_batch(vectors, ids.len(), self.dimension)?;
        self.vectors.extend_from_slice(vectors);
        self.ids.extend_from_slice(ids);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Drop all pending entries, keeping the allocation.
    pub fn clear(&mut self) {
        self.vectors.clear();
        self.ids.clear();
    }

    /// Drop pending entries and release their memory.
    pub fn release(&mut self) {
        self.vectors = Vec::new();
        self.ids = Vec::new();
    }

    /// Reserved capacity, in vectors.
    pub fn capacity(&self) -> usize {
        self.ids.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reserves_up_front() {
        let buf = IngestBuffer::with_capacity(4, 100);
        assert!(buf.capacity() >= 100);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_push_and_clear() {
        let mut buf = IngestBuffer::with_capacity(2, 4);
        buf.push_batch(&[1.0, 2.0, 3.0, 4.0], &[7, 8]).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.ids(), &[7, 8]);
        assert_eq!(buf.vectors(), &[1.0, 2.0, 3.0, 4.0]);

        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.vectors().is_empty());
    }

    #[test]
    fn test_bad_batch_leaves_buffer_untouched() {
        let mut buf = IngestBuffer::with_capacity(3, 4);
        buf.push_batch(&[1.0, 2.0, 3.0], &[1]).unwrap();
        assert!(buf.push_batch(&[1.0, 2.0], &[2]).is_err());
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.vectors().len(), 3);
    }

    proptest! {
        #[test]
        fn prop_shape_invariant_holds(
            dim in 1usize..8,
            batches in prop::collection::vec((0usize..6, any::<bool>()), 0..20),
        ) {
            let mut buf = IngestBuffer::with_capacity(dim, 2);
            let mut expected = 0usize;
            for (i, (count, well_formed)) in batches.into_iter().enumerate() {
                let floats = if well_formed { count * dim } else { count * dim + 1 };
                let vectors = vec![i as f32; floats];
                let ids = vec![i as i64; count];
                if buf.push_batch(&vectors, &ids).is_ok() {
                    expected += count;
                }
                prop_assert_eq!(buf.vectors().len(), buf.len() * dim);
            }
            prop_assert_eq!(buf.len(), expected);
        }
    }
}
