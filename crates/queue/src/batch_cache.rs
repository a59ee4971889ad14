//! Out-of-order batch buffering (spec §2 C3), grounded directly on
//! `GetBatch(batch_id, connection, scheduler)` in
//! `examples/original_source/src/scheduler/deterministic_scheduler.cc`.
//!
//! The sequencer is free to deliver batches out of order; a worker that
//! needs batch `n` next drains the underlying channel until `n` arrives,
//! stashing any batch it sees along the way that isn't the one it's
//! waiting for so a later caller asking for that batch number finds it
//! immediately instead of re-draining the channel.

use calvindb_core::Batch;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Anything that can hand back the next batch off the wire, in whatever
/// order the sequencer happened to send them. `recv` blocks until a
/// batch is available and returns `None` only once the source is
/// permanently closed (shutdown).
pub trait BatchSource: Send + Sync {
    /// Block for the next batch, or return `None` on shutdown.
    fn recv(&self) -> Option<Batch>;
}

/// Caches batches that arrived before they were asked for.
pub struct BatchCache {
    pending: Mutex<HashMap<u64, Batch>>,
}

impl Default for BatchCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        BatchCache {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the batch numbered `batch_number`, either immediately from
    /// the cache or by draining `source` until it arrives. Returns
    /// `None` only if `source` closes before delivering it.
    pub fn get_batch(&self, batch_number: u64, source: &dyn BatchSource) -> Option<Batch> {
        if let Some(batch) = self.pending.lock().remove(&batch_number) {
            return Some(batch);
        }
        loop {
            let batch = source.recv()?;
            if batch.batch_number == batch_number {
                return Some(batch);
            }
            self.pending.lock().insert(batch.batch_number, batch);
        }
    }

    /// Number of batches currently stashed awaiting a caller.
    pub fn cached_len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MockSource {
        queue: Mutex<VecDeque<Batch>>,
    }

    impl MockSource {
        fn new(order: Vec<u64>) -> Self {
            let queue = order
                .into_iter()
                .map(|n| Batch {
                    batch_number: n,
                    data: Vec::new(),
                })
                .collect();
            MockSource {
                queue: Mutex::new(queue),
            }
        }
    }

    impl BatchSource for MockSource {
        fn recv(&self) -> Option<Batch> {
            self.queue.lock().pop_front()
        }
    }

    #[test]
    fn returns_batch_immediately_when_it_arrives_first() {
        let source = MockSource::new(vec![0, 1, 2]);
        let cache = BatchCache::new();
        let b = cache.get_batch(0, &source).unwrap();
        assert_eq!(b.batch_number, 0);
        assert_eq!(cache.cached_len(), 0);
    }

    #[test]
    fn out_of_order_delivery_still_resolves_requested_batch() {
        // Sequencer sends 2, 0, 1 — a worker asking for 0 must drain
        // past 2 (stashing it), find 0, and leave 2 cached.
        let source = MockSource::new(vec![2, 0, 1]);
        let cache = BatchCache::new();

        let b0 = cache.get_batch(0, &source).unwrap();
        assert_eq!(b0.batch_number, 0);
        assert_eq!(cache.cached_len(), 1);

        let b1 = cache.get_batch(1, &source).unwrap();
        assert_eq!(b1.batch_number, 1);

        let b2 = cache.get_batch(2, &source).unwrap();
        assert_eq!(b2.batch_number, 2);
        assert_eq!(cache.cached_len(), 0);
    }

    #[test]
    fn shutdown_with_pending_request_returns_none() {
        let source = MockSource::new(vec![]);
        let cache = BatchCache::new();
        assert!(cache.get_batch(5, &source).is_none());
    }
}
