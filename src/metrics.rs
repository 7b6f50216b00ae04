//! Lightweight operation metrics: flush/seek/decode timings with percentile
//! tracking over a bounded rolling window.
//!
//! Scaled down from the teacher's server-facing request-latency metrics
//! (query counters, slow-query log, per-endpoint stats) to the handful of
//! operations this crate itself performs: block flush (writer), block
//! decode and seek (reader), and shard planning. Same shape — atomic
//! counters plus a mutex-guarded bounded deque for percentiles — just a
//! smaller operation set.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

const LATENCY_WINDOW_SIZE: usize = 1000;

/// The operations this crate instruments. `Other` catches anything a future
/// caller records that isn't one of the named kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Flush,
    Decode,
    Seek,
    Plan,
    Convert,
    Other,
}

impl Operation {
    const ALL: [Operation; 6] = [Operation::Flush, Operation::Decode, Operation::Seek, Operation::Plan, Operation::Convert, Operation::Other];

    fn label(&self) -> &'static str {
        match self {
            Operation::Flush => "flush",
            Operation::Decode => "decode",
            Operation::Seek => "seek",
            Operation::Plan => "plan",
            Operation::Convert => "convert",
            Operation::Other => "other",
        }
    }
}

#[derive(Default)]
struct OpCounters {
    count: AtomicU64,
    latency_sum_us: AtomicU64,
}

/// Thread-safe counters for a crate-local set of timed operations. Cheap to
/// hold behind an `Arc` and share across writer/reader/planner instances.
pub struct Metrics {
    total_count: AtomicU64,
    latencies_us: Mutex<VecDeque<u64>>,
    latency_sum_us: AtomicU64,
    per_op: [OpCounters; 6],
    started_at: Instant,
}

/// Point-in-time copy of [`Metrics`], safe to log or return from a status
/// call without holding any lock.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub total_count: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub avg_us: u64,
    pub uptime_secs: u64,
    pub per_op: Vec<(&'static str, u64, u64)>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            total_count: AtomicU64::new(0),
            latencies_us: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            latency_sum_us: AtomicU64::new(0),
            per_op: Default::default(),
            started_at: Instant::now(),
        }
    }

    /// Record one completed operation's duration.
    pub fn record(&self, op: Operation, duration_us: u64) {
        self.total_count.fetch_add(1, Ordering::Relaxed);
        let counters = &self.per_op[op as usize];
        counters.count.fetch_add(1, Ordering::Relaxed);
        counters.latency_sum_us.fetch_add(duration_us, Ordering::Relaxed);

        let mut latencies = self.latencies_us.lock().expect("metrics mutex poisoned");
        if latencies.len() >= LATENCY_WINDOW_SIZE {
            if let Some(old) = latencies.pop_front() {
                self.latency_sum_us.fetch_sub(old, Ordering::Relaxed);
            }
        }
        latencies.push_back(duration_us);
        self.latency_sum_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p95, p99, avg) = {
            let latencies = self.latencies_us.lock().expect("metrics mutex poisoned");
            if latencies.is_empty() {
                (0, 0, 0, 0)
            } else {
                let mut sorted: Vec<u64> = latencies.iter().copied().collect();
                sorted.sort_unstable();
                let len = sorted.len();
                let p50 = sorted[len * 50 / 100];
                let p95 = sorted[len * 95 / 100];
                let p99 = sorted.get(len * 99 / 100).copied().unwrap_or(sorted[len - 1]);
                let avg = self.latency_sum_us.load(Ordering::Relaxed) / len as u64;
                (p50, p95, p99, avg)
            }
        };

        let per_op = Operation::ALL
            .iter()
            .map(|op| {
                let counters = &self.per_op[*op as usize];
                (op.label(), counters.count.load(Ordering::Relaxed), counters.latency_sum_us.load(Ordering::Relaxed))
            })
            .filter(|(_, count, _)| *count > 0)
            .collect();

        MetricsSnapshot {
            total_count: self.total_count.load(Ordering::Relaxed),
            p50_us: p50,
            p95_us: p95,
            p99_us: p99,
            avg_us: avg,
            uptime_secs: self.started_at.elapsed().as_secs(),
            per_op,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_is_all_zero() {
        let m = Metrics::new();
        let snap = m.snapshot();
        assert_eq!(snap.total_count, 0);
        assert_eq!(snap.p50_us, 0);
        assert!(snap.per_op.is_empty());
    }

    #[test]
    fn records_per_operation_counts_and_averages() {
        let m = Metrics::new();
        m.record(Operation::Flush, 100);
        m.record(Operation::Flush, 300);
        m.record(Operation::Seek, 10);

        let snap = m.snapshot();
        assert_eq!(snap.total_count, 3);
        let flush = snap.per_op.iter().find(|(name, ..)| *name == "flush").unwrap();
        assert_eq!(flush.1, 2);
        assert_eq!(flush.2, 400);
    }

    #[test]
    fn percentiles_over_window() {
        let m = Metrics::new();
        for i in 1..=100u64 {
            m.record(Operation::Decode, i);
        }
        let snap = m.snapshot();
        assert_eq!(snap.p50_us, 51);
        assert_eq!(snap.p99_us, 100);
    }

    #[test]
    fn window_evicts_oldest_beyond_capacity() {
        let m = Metrics::new();
        for _ in 0..LATENCY_WINDOW_SIZE {
            m.record(Operation::Flush, 10);
        }
        for _ in 0..LATENCY_WINDOW_SIZE {
            m.record(Operation::Flush, 20);
        }
        let snap = m.snapshot();
        assert_eq!(snap.p50_us, 20);
    }
}
