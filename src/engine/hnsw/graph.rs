//! HNSW graph: core data structures and algorithms.
//!
//! Implements the Hierarchical Navigable Small World graph from:
//! "Efficient and robust approximate nearest neighbor search using
//!  Hierarchical Navigable Small World graphs" (Malkov & Yashunin, 2016/2018).
//!
//! Nodes carry the caller's `i64` label; internal ids are dense insertion order.
//! The layer-0 search accepts an `epsilon` tolerance: candidates up to
//! `worst + epsilon * |worst|` are still expanded, trading latency for recall.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::distance::Metric;
use crate::error::{AdapterError, Result};
use crate::vector::Vector;

use super::neighbor_queue::{MaxHeap, MinHeap, Neighbor};

/// Configuration parameters for the HNSW graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max number of connections per node (layers > 0).
    pub m: usize,
    /// Max connections at layer 0 (typically 2 * m).
    pub m_max0: usize,
    /// Number of candidates during construction.
    pub ef_construction: usize,
    /// Default number of candidates during search.
    pub ef_search: usize,
    /// Level generation factor: 1 / ln(m).
    pub ml: f64,
    /// Maximum number of layers.
    pub max_layers: usize,
    /// Seed for level generation. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(16, 200, 50)
    }
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            m_max0: 2 * m,
            ef_construction: ef_construction.max(m),
            ef_search: ef_search.max(1),
            ml: 1.0 / (m as f64).ln(),
            max_layers: 16,
            seed: None,
        }
    }

    /// Defaults tuned per metric. Inner-product graphs are less navigable than
    /// metric ones, so construction searches twice as wide.
    pub fn for_metric(
        metric: Metric,
        max_degree: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> Self {
        let m = if max_degree == 0 { 16 } else { max_degree };
        let ef_construction = match metric {
            Metric::L2 => ef_construction,
            Metric::InnerProduct => ef_construction.saturating_mul(2),
        };
        Self::new(m, ef_construction, ef_search)
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

/// A node in the HNSW graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    label: i64,
    vector: Vector,
    /// Neighbors per layer. neighbors[l] is the list of neighbor ids at layer l.
    neighbors: Vec<Vec<usize>>,
    /// Number of edges pointing at this node, per layer. Rebuilt on load.
    #[serde(skip)]
    in_degree: Vec<u32>,
}

impl HnswNode {
    fn level(&self) -> usize {
        self.neighbors.len() - 1
    }
}

/// Serialized form of the graph; everything except the RNG.
#[derive(Serialize, Deserialize)]
struct GraphImage {
    dimension: usize,
    metric: Metric,
    params: HnswParams,
    nodes: Vec<HnswNode>,
    entry_point: Option<usize>,
    max_level: usize,
}

/// The HNSW graph structure.
#[derive(Debug)]
pub struct HnswGraph {
    dimension: usize,
    nodes: Vec<HnswNode>,
    /// Entry point node id (highest-level node).
    entry_point: Option<usize>,
    /// Current maximum level in the graph.
    max_level: usize,
    params: HnswParams,
    metric: Metric,
    /// RNG for level generation.
    rng: StdRng,
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Expansion bound for a candidate given the current worst result.
fn tolerance_bound(worst: f32, epsilon: f32) -> f32 {
    worst + epsilon * worst.abs()
}

impl HnswGraph {
    pub fn new(dimension: usize, metric: Metric, params: HnswParams) -> Self {
        let rng = make_rng(params.seed);
        Self {
            dimension,
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
            params,
            metric,
            rng,
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Label of an internal node id.
    pub fn label(&self, id: usize) -> Option<i64> {
        self.nodes.get(id).map(|n| n.label)
    }

    /// Generate a random level for a new node.
    fn random_level(&mut self) -> usize {
        let r: f64 = self.rng.gen();
        // gen() can return 0.0, whose ln is -inf.
        let r = r.max(f64::MIN_POSITIVE);
        let level = (-r.ln() * self.params.ml).floor() as usize;
        level.min(self.params.max_layers - 1)
    }

    fn distance(&self, query: &[f32], node_id: usize) -> f32 {
        self.metric
            .distance_unchecked(query, self.nodes[node_id].vector.as_slice())
    }

    /// SEARCH-LAYER: Algorithm 2 from the HNSW paper, with an epsilon-widened
    /// expansion radius.
    fn search_layer(
        &self,
        query: &[f32],
        ep: &[usize],
        ef: usize,
        epsilon: f32,
        layer: usize,
    ) -> Vec<Neighbor> {
        let mut visited = HashSet::new();
        let mut candidates = MinHeap::new(); // closest candidate on top
        let mut results = MaxHeap::new(); // furthest result on top

        for &ep_id in ep {
            let dist = self.distance(query, ep_id);
            visited.insert(ep_id);
            candidates.push(Neighbor::new(ep_id, dist));
            results.push(Neighbor::new(ep_id, dist));
        }

        while let Some(c) = candidates.pop() {
            let furthest_dist = results.peek().map(|n| n.distance).unwrap_or(f32::MAX);
            if c.distance > tolerance_bound(furthest_dist, epsilon) {
                break;
            }

            let node = &self.nodes[c.id];
            if layer >= node.neighbors.len() {
                continue;
            }
            for &neighbor_id in &node.neighbors[layer] {
                if !visited.insert(neighbor_id) {
                    continue;
                }

                let dist = self.distance(query, neighbor_id);
                let furthest_dist = results.peek().map(|n| n.distance).unwrap_or(f32::MAX);

                if dist < furthest_dist || results.len() < ef {
                    candidates.push(Neighbor::new(neighbor_id, dist));
                    results.push_bounded(Neighbor::new(neighbor_id, dist), ef);
                } else if dist < tolerance_bound(furthest_dist, epsilon) {
                    candidates.push(Neighbor::new(neighbor_id, dist));
                }
            }
        }

        results.into_sorted_vec()
    }

    /// SELECT-NEIGHBORS-HEURISTIC: Algorithm 4 from the HNSW paper, keeping pruned
    /// connections. `candidates` must be sorted by ascending distance to the base.
    ///
    /// A candidate is preferred when it is closer to the base than to every neighbor
    /// already chosen; the remaining slots are filled from the skipped candidates.
    fn select_neighbors_heuristic(&self, candidates: &[Neighbor], m: usize) -> Vec<usize> {
        let mut selected: Vec<usize> = Vec::with_capacity(m);
        let mut skipped = Vec::new();
        for c in candidates {
            if selected.len() >= m {
                break;
            }
            let v = self.nodes[c.id].vector.as_slice();
            let diverse = selected.iter().all(|&s| {
                self.metric
                    .distance_unchecked(v, self.nodes[s].vector.as_slice())
                    > c.distance
            });
            if diverse {
                selected.push(c.id);
            } else {
                skipped.push(c.id);
            }
        }
        for id in skipped {
            if selected.len() >= m {
                break;
            }
            selected.push(id);
        }
        selected
    }

    /// Add the edge `from -> to` at `layer`.
    fn link(&mut self, from: usize, to: usize, layer: usize) {
        self.nodes[from].neighbors[layer].push(to);
        self.nodes[to].in_degree[layer] += 1;
    }

    /// Shrink a node's neighbor list at `layer` towards `m` entries.
    ///
    /// Never removes the last edge pointing at a node, so the list may stay above `m`.
    fn prune_neighbors(&mut self, node_id: usize, layer: usize, m: usize) {
        if layer >= self.nodes[node_id].neighbors.len() {
            return;
        }
        let base = self.nodes[node_id].vector.as_slice().to_vec();
        let current = std::mem::take(&mut self.nodes[node_id].neighbors[layer]);

        let mut scored: Vec<Neighbor> = current
            .iter()
            .map(|&nid| Neighbor::new(nid, self.distance(&base, nid)))
            .collect();
        scored.sort();

        let mut keep = self.select_neighbors_heuristic(&scored, m);
        for n in &scored {
            if !keep.contains(&n.id) && self.nodes[n.id].in_degree[layer] <= 1 {
                keep.push(n.id);
            }
        }
        // Shed the furthest edges whose target stays reachable some other way.
        for n in scored.iter().rev() {
            if keep.len() <= m {
                break;
            }
            if self.nodes[n.id].in_degree[layer] > 1 {
                if let Some(pos) = keep.iter().position(|&k| k == n.id) {
                    keep.swap_remove(pos);
                }
            }
        }

        for &nid in &current {
            if !keep.contains(&nid) {
                self.nodes[nid].in_degree[layer] -= 1;
            }
        }
        self.nodes[node_id].neighbors[layer] = keep;
    }

    /// INSERT: Algorithm 1 from the HNSW paper.
    pub fn insert(&mut self, label: i64, vector: Vector) -> Result<()> {
        if vector.dimension() != self.dimension {
            return Err(AdapterError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.dimension(),
            });
        }

        let level = self.random_level();
        let id = self.nodes.len();
        let query = vector.as_slice().to_vec();

        self.nodes.push(HnswNode {
            label,
            vector,
            neighbors: vec![Vec::new(); level + 1],
            in_degree: vec![0; level + 1],
        });

        let entry_point = match self.entry_point {
            None => {
                self.entry_point = Some(id);
                self.max_level = level;
                return Ok(());
            }
            Some(ep) => ep,
        };

        let mut ep_id = entry_point;
        let current_max_level = self.max_level;

        // Phase 1: Greedy descent from top layer down to level+1 (ef=1)
        if current_max_level > level {
            for l in (level + 1..=current_max_level).rev() {
                let nearest = self.search_layer(&query, &[ep_id], 1, 0.0, l);
                if let Some(n) = nearest.first() {
                    ep_id = n.id;
                }
            }
        }

        // Phase 2: Insert at layers min(level, current_max_level) down to 0
        let insert_from = level.min(current_max_level);
        for l in (0..=insert_from).rev() {
            let m = if l == 0 {
                self.params.m_max0
            } else {
                self.params.m
            };

            let nearest =
                self.search_layer(&query, &[ep_id], self.params.ef_construction, 0.0, l);
            let neighbors = self.select_neighbors_heuristic(&nearest, m);
            for &neighbor_id in &neighbors {
                self.link(id, neighbor_id, l);
            }

            // Bidirectional connections
            for &neighbor_id in &neighbors {
                if l >= self.nodes[neighbor_id].neighbors.len() {
                    continue;
                }
                self.link(neighbor_id, id, l);
                if self.nodes[neighbor_id].neighbors[l].len() > m {
                    self.prune_neighbors(neighbor_id, l, m);
                }
            }

            if let Some(n) = nearest.first() {
                ep_id = n.id;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(id);
            self.max_level = level;
        }

        Ok(())
    }

    /// SEARCH: Algorithm 5 from the HNSW paper.
    ///
    /// Search for the k nearest neighbors using `ef` candidates and an `epsilon`
    /// tolerance at layer 0. Returns at most `k` neighbors sorted by distance.
    pub fn search_knn(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        epsilon: f32,
    ) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(AdapterError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => return Ok(vec![]),
        };

        let mut ep_id = entry_point;

        // Phase 1: Greedy descent from top layer to layer 1 (ef=1)
        for l in (1..=self.max_level).rev() {
            let nearest = self.search_layer(query, &[ep_id], 1, 0.0, l);
            if let Some(n) = nearest.first() {
                ep_id = n.id;
            }
        }

        // Phase 2: Search layer 0 with max(ef, k) candidates
        let ef_actual = ef.max(k);
        let mut results = self.search_layer(query, &[ep_id], ef_actual, epsilon, 0);
        results.truncate(k);
        Ok(results)
    }

    /// Encode the graph (without the RNG) with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let image = GraphImage {
            dimension: self.dimension,
            metric: self.metric,
            params: self.params.clone(),
            nodes: self.nodes.clone(),
            entry_point: self.entry_point,
            max_level: self.max_level,
        };
        bincode::serialize(&image).map_err(|e| AdapterError::SerializationError(e.to_string()))
    }

    /// Decode a graph written by [`HnswGraph::to_bytes`], checking its structure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let image: GraphImage = bincode::deserialize(bytes)
            .map_err(|e| AdapterError::SerializationError(e.to_string()))?;

        let n = image.nodes.len();
        let consistent = image.entry_point.map_or(n == 0, |ep| ep < n)
            && image.nodes.iter().all(|node| {
                !node.neighbors.is_empty()
                    && node.vector.dimension() == image.dimension
                    && node.neighbors.iter().enumerate().all(|(layer, list)| {
                        list.iter()
                            .all(|&nid| nid < n && image.nodes[nid].neighbors.len() > layer)
                    })
            });
        if !consistent {
            return Err(AdapterError::CorruptImage(
                "graph image references missing nodes".to_string(),
            ));
        }
        if let Some(ep) = image.entry_point {
            if image.nodes[ep].level() != image.max_level {
                return Err(AdapterError::CorruptImage(
                    "graph entry point is not on the top level".to_string(),
                ));
            }
        }

        let mut nodes = image.nodes;
        for node in nodes.iter_mut() {
            node.in_degree = vec![0; node.neighbors.len()];
        }
        for id in 0..nodes.len() {
            for layer in 0..nodes[id].neighbors.len() {
                for i in 0..nodes[id].neighbors[layer].len() {
                    let nid = nodes[id].neighbors[layer][i];
                    nodes[nid].in_degree[layer] += 1;
                }
            }
        }

        let rng = make_rng(image.params.seed);
        Ok(Self {
            dimension: image.dimension,
            nodes,
            entry_point: image.entry_point,
            max_level: image.max_level,
            params: image.params,
            metric: image.metric,
            rng,
        })
    }
}
