//! Recall tests: the graph index against an exact flat index, and the wide search
//! profile against the narrow one.

use std::collections::HashSet;

use ann_adapter::{AdapterConfig, SearchTuning, VectorIndexHandle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vectors(rng: &mut StdRng, n: usize, dim: usize) -> Vec<f32> {
    (0..n * dim).map(|_| rng.gen::<f32>()).collect()
}

fn recall_at_k(truth: &[i64], found: &[i64]) -> f64 {
    let truth: HashSet<i64> = truth.iter().copied().collect();
    let hits = found.iter().filter(|id| truth.contains(id)).count();
    hits as f64 / truth.len() as f64
}

fn build(index_type: i32, dim: usize, data: &[f32], config: AdapterConfig) -> VectorIndexHandle {
    let mut handle =
        VectorIndexHandle::create_with_config(index_type, "float32", "l2", dim, 16, 200, 100, config)
            .unwrap();
    let ids: Vec<i64> = (0..(data.len() / dim) as i64).collect();
    handle.add(data, &ids).unwrap();
    handle
}

fn test_recall(n: usize, dim: usize, k: usize, num_queries: usize, min_recall: f64) {
    let mut rng = StdRng::seed_from_u64(n as u64);
    let data = random_vectors(&mut rng, n, dim);
    let config = AdapterConfig::default()
        .with_build_threshold(n / 2)
        .with_seed(7);

    let mut flat = build(1, dim, &data, config.clone());
    let mut hnsw = build(0, dim, &data, config);
    assert!(hnsw.is_built());

    let queries = random_vectors(&mut rng, num_queries, dim);
    let mut total = 0.0;
    for query in queries.chunks_exact(dim) {
        let truth = flat.search(query, k).unwrap();
        let found = hnsw.search(query, k).unwrap();
        total += recall_at_k(&truth.ids, &found.ids);
    }

    let avg = total / num_queries as f64;
    assert!(
        avg >= min_recall,
        "Recall {:.3} is below threshold {:.3} for n={}, dim={}, k={}",
        avg,
        min_recall,
        n,
        dim,
        k
    );
}

#[test]
fn test_recall_100_vectors() {
    test_recall(100, 32, 10, 50, 0.90);
}

#[test]
fn test_recall_1000_vectors() {
    test_recall(1000, 64, 10, 50, 0.90);
}

#[test]
fn test_recall_3000_vectors() {
    test_recall(3000, 64, 10, 20, 0.85);
}

#[test]
fn test_wide_profile_not_worse_than_narrow() {
    let (n, dim, k) = (400, 16, 10);
    let mut rng = StdRng::seed_from_u64(99);
    let data = random_vectors(&mut rng, n, dim);
    let config = AdapterConfig::default().with_build_threshold(n).with_seed(5);

    let mut flat = build(1, dim, &data, config.clone());
    let mut hnsw = build(0, dim, &data, config);

    let queries = random_vectors(&mut rng, 20, dim);
    for query in queries.chunks_exact(dim) {
        let truth = flat.search(query, k).unwrap();
        let narrow = hnsw.search(query, k).unwrap();
        // Default tuning switches to the wide profile at topk 10000.
        let wide = hnsw.search(query, 10_000).unwrap();
        assert!(wide.len() >= k && wide.len() <= n);

        let narrow_hits = recall_at_k(&truth.ids, &narrow.ids);
        let wide_hits = recall_at_k(&truth.ids, &wide.ids[..k]);
        assert!(
            wide_hits >= narrow_hits,
            "wide recall {wide_hits} < narrow recall {narrow_hits}"
        );
    }
}

#[test]
fn test_lowered_wide_threshold_keeps_recall() {
    let (n, dim, k) = (1500, 32, 20);
    let mut rng = StdRng::seed_from_u64(3);
    let data = random_vectors(&mut rng, n, dim);
    let config = AdapterConfig {
        search: SearchTuning {
            wide_topk_threshold: k,
            wide_expansion: 4.0,
            ..SearchTuning::default()
        },
        ..AdapterConfig::default().with_build_threshold(n).with_seed(11)
    };

    let mut flat = build(1, dim, &data, config.clone());
    let mut hnsw = build(0, dim, &data, config);

    let queries = random_vectors(&mut rng, 20, dim);
    let mut total = 0.0;
    for query in queries.chunks_exact(dim) {
        let truth = flat.search(query, k).unwrap();
        let found = hnsw.search(query, k).unwrap();
        total += recall_at_k(&truth.ids, &found.ids);
    }
    let avg = total / 20.0;
    assert!(avg >= 0.9, "wide-profile recall {avg:.3} below 0.9");
}

#[test]
fn test_every_vector_finds_itself() {
    let (n, dim) = (2000, 16);
    let mut rng = StdRng::seed_from_u64(42);
    let data = random_vectors(&mut rng, n, dim);
    let config = AdapterConfig::default().with_build_threshold(n).with_seed(42);

    let mut handle =
        VectorIndexHandle::create_with_config(0, "float32", "l2", dim, 8, 100, 64, config).unwrap();
    let ids: Vec<i64> = (0..n as i64).collect();
    handle.add(&data, &ids).unwrap();
    assert!(handle.is_built());

    let misses = data
        .chunks_exact(dim)
        .zip(&ids)
        .filter(|&(vector, id)| !handle.search(vector, 10).unwrap().ids.contains(id))
        .count();
    assert!(misses <= n / 1000, "{misses} of {n} vectors not found by their own query");
}
