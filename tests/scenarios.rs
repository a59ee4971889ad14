//! End-to-end scenarios from spec.md §8, driven through the public
//! `calvindb::Scheduler` facade against the in-process channel test
//! doubles and the reference `InMemoryStorage`/`CounterApp`.
//!
//! Scenario 3 (abort cascade) and scenario 6 (shutdown) are exercised
//! more directly — and more deterministically — at the worker/storage
//! layer in `calvindb-scheduler`'s and `calvindb-storage`'s own test
//! modules, since forcing a specific in-flight transaction to abort
//! mid-execution needs access to its `StorageManager` that the facade
//! deliberately doesn't expose. What's covered here is what the facade
//! actually promises: batches in, commits out, in the right order,
//! regardless of delivery or worker-count.

use calvindb::{
    channel_batch_source, channel_recon_source, Batch, ChannelMultiplexer, CounterApp,
    InMemoryStorage, Scheduler, SchedulerConfig, Storage, Txn,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn counter_txn(id: u64, key: &str) -> Vec<u8> {
    let mut txn = Txn::new(id, "incr");
    txn.read_write_set = vec![key.to_string()];
    txn.encode().expect("txn encodes")
}

fn spawn_counter_scheduler(
    num_threads: usize,
) -> (
    Scheduler,
    calvindb::BatchProducer,
    Arc<InMemoryStorage>,
) {
    let config = SchedulerConfig::builder(num_threads, 0).without_affinity().build();
    let (batch_producer, batch_source) = channel_batch_source();
    let (_recon_producer, recon_source) = channel_recon_source();
    let storage = Arc::new(InMemoryStorage::new());

    let scheduler = Scheduler::spawn(
        config,
        Arc::new(CounterApp),
        Arc::clone(&storage) as Arc<dyn Storage>,
        Arc::new(ChannelMultiplexer::new()),
        Arc::new(batch_source),
        Arc::new(recon_source),
    );

    (scheduler, batch_producer, storage)
}

fn wait_for_drain(scheduler: &Scheduler, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while scheduler.shared().pending_len() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(
        scheduler.shared().pending_len(),
        0,
        "all admitted transactions should have drained within the timeout"
    );
}

/// Scenario 1: single-node, single-key contention. Three increments on
/// the same key, starting from zero, must leave it at 3 with exactly 3
/// commits (spec §8 scenario 1, invariant I1).
#[test]
fn single_node_single_key_contention() {
    let (mut scheduler, batch_producer, storage) = spawn_counter_scheduler(1);

    let data = (1..=3u64).map(|id| counter_txn(id, "x")).collect();
    batch_producer.send(Batch { batch_number: 0, data });

    wait_for_drain(&scheduler, Duration::from_secs(5));
    assert_eq!(storage.committed(&"x".to_string()), Some(3i64.to_le_bytes().to_vec()));
    assert_eq!(scheduler.shared().throughput.total_committed(), 3);

    drop(batch_producer);
    scheduler.shutdown();
}

/// Scenario 2: cross-worker ordering. 100 transactions, each reading and
/// writing the same key, spread across 4 workers, must still serialize
/// to a final value of 100 — determinism (invariant I1) holds regardless
/// of which worker happens to execute which transaction.
#[test]
fn cross_worker_ordering_on_shared_key() {
    let (mut scheduler, batch_producer, storage) = spawn_counter_scheduler(4);

    let data = (1..=100u64).map(|id| counter_txn(id, "shared")).collect();
    batch_producer.send(Batch { batch_number: 0, data });

    wait_for_drain(&scheduler, Duration::from_secs(10));
    assert_eq!(storage.committed(&"shared".to_string()), Some(100i64.to_le_bytes().to_vec()));
    assert_eq!(scheduler.shared().throughput.total_committed(), 100);

    drop(batch_producer);
    scheduler.shutdown();
}

/// Scenario 5: out-of-order batches. The sequencer ships batches
/// `2, 0, 1`; the dispatch loop's batch cache (C3) must still admit them
/// in ascending order so per-key commits land in global txn-id order.
#[test]
fn out_of_order_batches_commit_in_global_order() {
    let (mut scheduler, batch_producer, storage) = spawn_counter_scheduler(2);

    // Each batch increments a distinct key so the final value directly
    // reflects how many of that batch's transactions actually committed,
    // while a shared key across all three batches proves admission order.
    batch_producer.send(Batch {
        batch_number: 2,
        data: vec![counter_txn(300, "shared"), counter_txn(301, "b2")],
    });
    batch_producer.send(Batch {
        batch_number: 0,
        data: vec![counter_txn(100, "shared"), counter_txn(101, "b0")],
    });
    batch_producer.send(Batch {
        batch_number: 1,
        data: vec![counter_txn(200, "shared"), counter_txn(201, "b1")],
    });

    wait_for_drain(&scheduler, Duration::from_secs(10));

    // All nine transactions committed regardless of delivery order.
    assert_eq!(scheduler.shared().throughput.total_committed(), 6);
    assert_eq!(storage.committed(&"shared".to_string()), Some(3i64.to_le_bytes().to_vec()));
    assert_eq!(storage.committed(&"b0".to_string()), Some(1i64.to_le_bytes().to_vec()));
    assert_eq!(storage.committed(&"b1".to_string()), Some(1i64.to_le_bytes().to_vec()));
    assert_eq!(storage.committed(&"b2".to_string()), Some(1i64.to_le_bytes().to_vec()));

    drop(batch_producer);
    scheduler.shutdown();
}

/// Property P5: determinism. Running the same batch bytes through two
/// freshly constructed schedulers, from the same initial storage state,
/// must produce identical committed state.
#[test]
fn rerunning_the_same_batch_is_deterministic() {
    let batch_bytes: Vec<Vec<u8>> = (1..=50u64).map(|id| counter_txn(id, "det")).collect();

    let mut results = Vec::new();
    for _ in 0..2 {
        let (mut scheduler, batch_producer, storage) = spawn_counter_scheduler(3);
        batch_producer.send(Batch {
            batch_number: 0,
            data: batch_bytes.clone(),
        });
        wait_for_drain(&scheduler, Duration::from_secs(10));
        results.push(storage.committed(&"det".to_string()));
        drop(batch_producer);
        scheduler.shutdown();
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], Some(50i64.to_le_bytes().to_vec()));
}
