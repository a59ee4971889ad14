//! Per-second throughput/abort sampling and latency histogramming
//! (spec §3 supplement), grounded on `LATENCY_SIZE`/`SAMPLE_RATE` and
//! the `throughput[second]`/`abort[second]` arrays in
//! `examples/original_source/src/scheduler/deterministic_scheduler.cc`'s
//! `LockManagerThread`.

use calvindb_core::config::{LATENCY_SAMPLE_RATE, LATENCY_SAMPLE_SIZE};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Tracks cumulative commits/aborts and buckets them into per-second
/// throughput samples, plus a bounded ring of sampled per-transaction
/// latencies.
pub struct ThroughputSampler {
    start: Instant,
    committed_total: AtomicU64,
    aborted_total: AtomicU64,
    last_sample_committed: AtomicU64,
    last_sample_aborted: AtomicU64,
    last_sample_second: AtomicU64,
    history: Mutex<VecDeque<ThroughputSample>>,
    history_capacity: usize,
    latencies: Mutex<VecDeque<u64>>,
}

/// One second's worth of committed/aborted counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputSample {
    /// Wall-clock second since the sampler started.
    pub second: u64,
    /// Transactions committed during that second.
    pub committed: u64,
    /// Transactions aborted during that second.
    pub aborted: u64,
}

impl ThroughputSampler {
    /// Start a fresh sampler, with history bounded at `history_capacity`
    /// seconds.
    pub fn new(history_capacity: usize) -> Self {
        ThroughputSampler {
            start: Instant::now(),
            committed_total: AtomicU64::new(0),
            aborted_total: AtomicU64::new(0),
            last_sample_committed: AtomicU64::new(0),
            last_sample_aborted: AtomicU64::new(0),
            last_sample_second: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLE_SIZE)),
        }
    }

    /// Record one committed transaction.
    pub fn record_commit(&self) {
        self.committed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one aborted transaction.
    pub fn record_abort(&self) {
        self.aborted_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a latency sample for `seed` if it falls on the sample
    /// boundary (`seed % LATENCY_SAMPLE_RATE == 0`), mirroring the
    /// original's selective instrumentation so the hot path isn't
    /// timestamped on every transaction.
    pub fn maybe_sample_latency(&self, seed: u64, latency_micros: u64) {
        if seed % LATENCY_SAMPLE_RATE != 0 {
            return;
        }
        let mut latencies = self.latencies.lock();
        if latencies.len() == LATENCY_SAMPLE_SIZE {
            latencies.pop_front();
        }
        latencies.push_back(latency_micros);
    }

    /// If at least one wall-clock second has elapsed since the last
    /// call, push a new [`ThroughputSample`] covering the elapsed
    /// second(s) and trim history to capacity. Safe to call from a
    /// single dispatch-thread tick; concurrent calls are safe but may
    /// race on which one records the sample.
    pub fn tick(&self) {
        let elapsed_second = self.start.elapsed().as_secs();
        let last_second = self.last_sample_second.load(Ordering::Acquire);
        if elapsed_second <= last_second {
            return;
        }

        let committed_now = self.committed_total.load(Ordering::Relaxed);
        let aborted_now = self.aborted_total.load(Ordering::Relaxed);
        let committed_delta = committed_now - self.last_sample_committed.swap(committed_now, Ordering::AcqRel);
        let aborted_delta = aborted_now - self.last_sample_aborted.swap(aborted_now, Ordering::AcqRel);
        self.last_sample_second.store(elapsed_second, Ordering::Release);

        let mut history = self.history.lock();
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(ThroughputSample {
            second: elapsed_second,
            committed: committed_delta,
            aborted: aborted_delta,
        });
    }

    /// Snapshot of recorded per-second samples, oldest first.
    pub fn history(&self) -> Vec<ThroughputSample> {
        self.history.lock().iter().copied().collect()
    }

    /// Snapshot of sampled latencies, oldest first.
    pub fn latencies(&self) -> Vec<u64> {
        self.latencies.lock().iter().copied().collect()
    }

    /// Total transactions committed since the sampler started.
    pub fn total_committed(&self) -> u64 {
        self.committed_total.load(Ordering::Relaxed)
    }

    /// Total transactions aborted since the sampler started.
    pub fn total_aborted(&self) -> u64 {
        self.aborted_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_commits_and_aborts() {
        let s = ThroughputSampler::new(10);
        s.record_commit();
        s.record_commit();
        s.record_abort();
        assert_eq!(s.total_committed(), 2);
        assert_eq!(s.total_aborted(), 1);
    }

    #[test]
    fn latency_sampling_respects_sample_rate() {
        let s = ThroughputSampler::new(10);
        s.maybe_sample_latency(0, 100);
        s.maybe_sample_latency(1, 200);
        s.maybe_sample_latency(LATENCY_SAMPLE_RATE, 300);
        assert_eq!(s.latencies(), vec![100, 300]);
    }

    #[test]
    fn history_stays_within_capacity() {
        let s = ThroughputSampler::new(2);
        // Directly exercise the bound by pushing more than capacity.
        for i in 0..5u64 {
            s.history.lock().push_back(ThroughputSample {
                second: i,
                committed: i,
                aborted: 0,
            });
            if s.history.lock().len() > s.history_capacity {
                s.history.lock().pop_front();
            }
        }
        assert!(s.history().len() <= 2);
    }
}
