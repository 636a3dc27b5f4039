//! Per-handle statistics: ingestion counts, build/flush events and search latency.

use std::collections::VecDeque;
use std::time::Duration;

/// Latency samples kept for averages and percentiles. Older samples are evicted.
pub const LATENCY_WINDOW: usize = 1024;

/// Collects runtime statistics for one index handle.
#[derive(Debug, Default, Clone)]
pub struct IndexStats {
    search_latencies_us: VecDeque<f64>,
    vectors_added: u64,
    bulk_builds: u64,
    flushes: u64,
    searches: u64,
}

impl IndexStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_add(&mut self, count: usize) {
        self.vectors_added += count as u64;
    }

    /// The one-shot threshold build.
    pub fn record_bulk_build(&mut self) {
        self.bulk_builds += 1;
    }

    /// A read-triggered drain of the pending buffer.
    pub fn record_flush(&mut self) {
        self.flushes += 1;
    }

    pub fn record_search(&mut self, duration: Duration) {
        self.searches += 1;
        if self.search_latencies_us.len() >= LATENCY_WINDOW {
            self.search_latencies_us.pop_front();
        }
        self.search_latencies_us.push_back(duration.as_micros() as f64);
    }

    pub fn vectors_added(&self) -> u64 {
        self.vectors_added
    }

    pub fn bulk_builds(&self) -> u64 {
        self.bulk_builds
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn searches(&self) -> u64 {
        self.searches
    }

    /// Samples currently in the latency window.
    pub fn latency_samples(&self) -> usize {
        self.search_latencies_us.len()
    }

    /// Average search latency in microseconds.
    pub fn avg_search_latency_us(&self) -> f64 {
        if self.search_latencies_us.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.search_latencies_us.iter().sum();
        sum / self.search_latencies_us.len() as f64
    }

    /// Get a percentile of search latency (e.g., 50.0, 95.0, 99.0).
    pub fn percentile_search_latency_us(&self, percentile: f64) -> f64 {
        if self.search_latencies_us.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f64> = self.search_latencies_us.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let mut s = IndexStats::new();
        s.record_add(3);
        s.record_add(2);
        s.record_flush();
        s.record_bulk_build();

        assert_eq!(s.vectors_added(), 5);
        assert_eq!(s.flushes(), 1);
        assert_eq!(s.bulk_builds(), 1);
        assert_eq!(s.searches(), 0);
    }

    #[test]
    fn test_latency() {
        let mut s = IndexStats::new();
        s.record_search(Duration::from_micros(100));
        s.record_search(Duration::from_micros(200));
        s.record_search(Duration::from_micros(300));

        assert_eq!(s.searches(), 3);
        assert!((s.avg_search_latency_us() - 200.0).abs() < 1.0);
        assert!((s.percentile_search_latency_us(50.0) - 200.0).abs() < 1.0);
        assert!((s.percentile_search_latency_us(100.0) - 300.0).abs() < 1.0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut s = IndexStats::new();
        for i in 0..5000u64 {
            s.record_search(Duration::from_micros(i));
        }
        assert_eq!(s.searches(), 5000);
        assert_eq!(s.latency_samples(), LATENCY_WINDOW);
        // Only the most recent samples remain.
        let oldest = (5000 - LATENCY_WINDOW) as f64;
        assert!((s.percentile_search_latency_us(0.0) - oldest).abs() < 1.0);
        assert!((s.percentile_search_latency_us(100.0) - 4999.0).abs() < 1.0);
    }

    #[test]
    fn test_empty() {
        let s = IndexStats::new();
        assert_eq!(s.avg_search_latency_us(), 0.0);
        assert_eq!(s.percentile_search_latency_us(99.0), 0.0);
    }
}
