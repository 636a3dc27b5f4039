//! Bounded priority queues over `(node, distance)` pairs for graph traversal.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// A graph node reached during traversal, with its distance to the query.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    pub distance: f32,
    pub id: usize,
}

impl Neighbor {
    pub fn new(id: usize, distance: f32) -> Self {
        Self { distance, id }
    }
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Ties on distance fall back to node id so traversal order is deterministic.
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Result set: furthest neighbor on top so it can be evicted first.
#[derive(Default)]
pub struct MaxHeap {
    heap: BinaryHeap<Neighbor>,
}

impl MaxHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, n: Neighbor) {
        self.heap.push(n);
    }

    /// Push, then evict the furthest entry while more than `limit` remain.
    pub fn push_bounded(&mut self, n: Neighbor, limit: usize) {
        self.heap.push(n);
        while self.heap.len() > limit {
            self.heap.pop();
        }
    }

    pub fn peek(&self) -> Option<&Neighbor> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Drain into a Vec sorted by ascending distance.
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

/// Candidate frontier: closest neighbor on top.
#[derive(Default)]
pub struct MinHeap {
    heap: BinaryHeap<Reverse<Neighbor>>,
}

impl MinHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, n: Neighbor) {
        self.heap.push(Reverse(n));
    }

    pub fn pop(&mut self) -> Option<Neighbor> {
        self.heap.pop().map(|Reverse(n)| n)
    }
}
