//! Worker loop (spec §2 C5, §4.5), grounded on the per-thread `Run()`
//! loop in `examples/original_source/src/scheduler/deterministic_scheduler.cc`.
//!
//! Each worker is a single OS thread, cooperatively polling four sources
//! in strict priority order every iteration — never blocking on
//! application logic (spec §5). `active_txns` is shared across every
//! worker (spec §9 design note: "a rewrite should use the numeric id
//! directly"; spec §5 explicitly permits sharing it with C2 "provided
//! per-transaction-id exclusivity"), because a suspended transaction's
//! resumption message is not guaranteed to land back on the worker that
//! suspended it (spec §4.5 "Suspension semantics").

use crate::recon::{ReconSource, SharedReconEngine};
use calvindb_core::{
    Application, Connection, ExecResult, NodeId, Storage, Txn, TxnId, WorkerMessage,
};
use calvindb_queue::{AtomicQueue, ConcurrentMap};
use calvindb_storage::StorageManager;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::throughput::ThroughputSampler;
use crate::time::now_micros;

/// State every worker shares: the inbound work queue dispatch feeds
/// (spec §4.6), the active-transaction table (spec §3, §9), the
/// reconnaissance engine (spec §4.4), and the counters the lifecycle
/// supervisor and dispatch loop both need to observe.
pub struct WorkerShared {
    /// Transactions admitted by the dispatch loop, and transactions
    /// re-enqueued by a worker after observing an abort (spec §4.6, I3).
    pub txns_queue: AtomicQueue<Txn>,
    /// Per-transaction execution state for suspended transactions, keyed
    /// by `txn_id` (spec §3 "active map").
    pub active_txns: ConcurrentMap<TxnId, StorageManager>,
    /// Reconnaissance engine shared by every worker (spec §4.4).
    pub recon_engine: SharedReconEngine,
    /// Throughput/abort/latency sampler (spec §3 supplement).
    pub throughput: Arc<ThroughputSampler>,
    /// Admitted-but-not-committed counter the dispatch loop throttles
    /// against (spec §4.6 `pending_txns`). Workers decrement this on
    /// every commit or permanent abort — the decrement path spec §9
    /// notes the original source never shows.
    pub pending_txns: AtomicU64,
    /// Set by the lifecycle supervisor on shutdown (spec §4.7
    /// `deconstructor_invoked`); every loop polls it at its head.
    pub shutdown: AtomicBool,
    /// This node's id, used to build the `ReadContext`/outbound replies.
    pub this_node_id: NodeId,
    /// Cold-key eviction threshold (spec §6 `cold_cutoff`). Keys whose
    /// numeric value (parsed as a little-endian i64) exceeds this are
    /// unfetched after commit.
    pub cold_cutoff: i64,
}

impl WorkerShared {
    /// Construct fresh shared state for a pool of workers.
    pub fn new(
        this_node_id: NodeId,
        cold_cutoff: i64,
        recon_engine: SharedReconEngine,
        throughput: Arc<ThroughputSampler>,
    ) -> Self {
        WorkerShared {
            txns_queue: AtomicQueue::new(),
            active_txns: ConcurrentMap::new(),
            recon_engine,
            throughput,
            pending_txns: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            this_node_id,
            cold_cutoff,
        }
    }

    /// Number of transactions the dispatch loop currently believes are
    /// in flight (admitted, not yet committed or permanently aborted).
    pub fn pending_len(&self) -> u64 {
        self.pending_txns.load(Ordering::Acquire)
    }

    fn admit_done(&self) {
        self.pending_txns.fetch_sub(1, Ordering::AcqRel);
    }

    /// True once the lifecycle supervisor has signalled shutdown (spec
    /// §4.7).
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// One worker thread's loop body, cooperatively polling its priority
/// sources (spec §4.5). Owns its dedicated inbound connection; every
/// other piece of state is shared via [`WorkerShared`].
pub struct Worker {
    id: usize,
    shared: Arc<WorkerShared>,
    connection: Arc<dyn Connection>,
    application: Arc<dyn Application>,
    storage: Arc<dyn Storage>,
}

impl Worker {
    /// Build a worker. `connection` is the shared inbound message queue
    /// every worker polls (spec §4.5: "each worker owns a dedicated
    /// thread_connection"; see `messaging::WORKER_CHANNEL` for why this
    /// is one connection cloned across workers rather than one per
    /// worker — a `READ_RESULT`/`RECON_READ_RESULT` is addressed by
    /// `destination_channel = txn_id` (spec §6), not by worker id, and a
    /// suspended transaction isn't pinned to the worker that suspended
    /// it (spec §4.5 "Suspension semantics"), so every worker needs to
    /// be able to observe every such message).
    pub fn new(
        id: usize,
        shared: Arc<WorkerShared>,
        connection: Arc<dyn Connection>,
        application: Arc<dyn Application>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Worker {
            id,
            shared,
            connection,
            application,
            storage,
        }
    }

    /// Run the polling loop until shutdown is signalled (spec §4.7).
    /// `recon_source` is the channel this worker attempts to drain for
    /// inbound recon batches (spec §4.5 step 4); any worker may drain
    /// it, there's no per-worker ownership.
    pub fn run(&mut self, recon_source: &dyn ReconSource) {
        debug!(worker = self.id, "worker loop starting");
        let mut idle_polls: u32 = 0;
        while !self.shared.is_shutting_down() {
            let did_work = self.tick(recon_source);
            if did_work {
                idle_polls = 0;
            } else {
                idle_polls = idle_polls.saturating_add(1);
                backoff(idle_polls);
            }
        }
        debug!(worker = self.id, "worker loop exiting on shutdown signal");
    }

    /// Run exactly one iteration of the four-priority poll (spec §4.5).
    /// Returns `true` if any step did real work, so callers (tests, and
    /// [`Self::run`]'s backoff) can tell an idle poll from a productive
    /// one.
    pub fn tick(&mut self, recon_source: &dyn ReconSource) -> bool {
        if self.step_normal_txn() {
            return true;
        }
        if self.step_read_result() {
            return true;
        }
        if self
            .shared
            .recon_engine
            .run_one(self.application.as_ref(), self.storage.as_ref())
        {
            self.flush_recon_reply();
            return true;
        }
        if self.shared.recon_engine.drain_channel(recon_source) > 0 {
            return true;
        }
        false
    }

    /// Send the recon engine's accumulated reply buffer, if non-empty,
    /// to the sequencer (spec §4.4 step 4). The original scheduler sends
    /// inline the moment a designated responder resolves a transaction,
    /// under `recon_mutex_`; here that's modeled as draining the shared
    /// buffer right after the call that might have appended to it, so
    /// replies go out promptly without a separate flush thread.
    fn flush_recon_reply(&self) {
        let Some(msg) = self.shared.recon_engine.take_reply() else {
            return;
        };
        if let Err(err) = self.connection.send(0, msg) {
            warn!(worker = self.id, error = %err, "failed to send recon index reply");
        }
    }

    /// Priority 1: pop a normal transaction, run it to commit, suspend,
    /// or abort-and-requeue (spec §4.5 step 1).
    fn step_normal_txn(&mut self) -> bool {
        let Some(txn) = self.shared.txns_queue.pop() else {
            return false;
        };

        let manager = match self.shared.active_txns.erase(&txn.txn_id) {
            Some(existing) => existing,
            None => StorageManager::new(txn),
        };

        self.drive(manager);
        true
    }

    /// Priority 2: handle one inbound message on this worker's own
    /// connection (spec §4.5 step 2). Recon messages are routed to the
    /// shared [`crate::recon::ReconEngine`]; normal `READ_RESULT`
    /// messages resume whichever suspended transaction they target,
    /// wherever it happens to be in `active_txns` (spec §4.5
    /// "Suspension semantics": not pinned to the worker that suspended
    /// it).
    fn step_read_result(&mut self) -> bool {
        let Some(message) = self.connection.try_receive() else {
            return false;
        };

        if message.is_recon() {
            let Some(txn_id) = message.target_txn_id() else {
                warn!(worker = self.id, "recon read result with unparsable destination_channel");
                return true;
            };
            self.shared.recon_engine.handle_read_result(
                txn_id,
                message.data(),
                self.application.as_ref(),
                self.storage.as_ref(),
            );
            self.flush_recon_reply();
            return true;
        }

        let Some(txn_id) = message.target_txn_id() else {
            warn!(worker = self.id, "read result with unparsable destination_channel");
            return true;
        };
        let Some(mut manager) = self.shared.active_txns.erase(&txn_id) else {
            trace!(worker = self.id, txn_id, "read result for unknown/already-resolved transaction");
            return true;
        };
        manager.apply_read_result(message.data());
        self.drive(manager);
        true
    }

    /// Invoke the application against `manager`, acting on the outcome
    /// per spec §4.5 step 1: commit-and-destroy, suspend-and-retain, or
    /// abort-increment-and-requeue. Takes ownership of `manager` since
    /// exactly one of those three outcomes happens to it: destroyed,
    /// handed back to `active_txns`, or (for abort) handed back after
    /// being reset to its next incarnation.
    fn drive(&mut self, mut manager: StorageManager) {
        if manager.is_aborted() {
            self.requeue_after_abort(manager);
            return;
        }

        let ctx = manager.read_context();
        let overlay = manager.remote_reads().clone();
        let view = calvindb_storage::OverlayStorage::new(self.storage.as_ref(), &overlay);
        let result = self.application.execute(&manager.txn, &ctx, &view);

        match result {
            ExecResult::Success => {
                if manager.is_aborted() {
                    // Abort bit flipped mid-execution; the storage
                    // engine's commit will refuse it below, but we can
                    // skip straight to the requeue path instead of
                    // paying for a doomed commit attempt.
                    self.requeue_after_abort(manager);
                    return;
                }
                match self.storage.commit(manager.txn_id()) {
                    calvindb_core::CommitOutcome::Committed => {
                        self.on_committed(&manager);
                    }
                    calvindb_core::CommitOutcome::Aborted => {
                        self.requeue_after_abort(manager);
                    }
                }
            }
            ExecResult::Suspended => {
                trace!(worker = self.id, txn_id = manager.txn_id(), "transaction suspended on remote read");
                self.shared.active_txns.put(manager.txn_id(), manager);
            }
            ExecResult::Failure => {
                debug!(worker = self.id, txn_id = manager.txn_id(), "transaction failed permanently");
                self.storage.discard(manager.txn_id());
                self.shared.admit_done();
                self.shared.throughput.record_abort();
            }
        }
    }

    fn on_committed(&self, manager: &StorageManager) {
        self.unfetch_cold_keys(manager);
        self.shared.admit_done();
        self.shared.throughput.record_commit();
        if manager.txn.start_time != 0 {
            let elapsed = now_micros().saturating_sub(manager.txn.start_time);
            self.shared.throughput.maybe_sample_latency(manager.txn.seed, elapsed);
        }
        trace!(worker = self.id, txn_id = manager.txn_id(), "transaction committed");
    }

    /// Per spec §4.5 step 1: "increment the manager's abort counter,
    /// reset its state, and re-push the transaction onto `txns_queue`".
    /// The manager itself is kept, not destroyed — it lives in
    /// `active_txns` between the requeue and the next pop of this
    /// `txn_id` off the queue, exactly as a suspended manager would,
    /// just without I2's "no worker queue" half of the invariant (an
    /// abort-retry transaction is deliberately in both places at once:
    /// the map holds its state, the queue holds its re-dispatch ticket).
    fn requeue_after_abort(&self, mut manager: StorageManager) {
        self.storage.discard(manager.txn_id());
        manager.restart();
        self.shared.throughput.record_abort();
        debug!(
            worker = self.id,
            txn_id = manager.txn_id(),
            incarnation = manager.read_context().incarnation,
            "transaction aborted, re-enqueuing"
        );
        self.shared.txns_queue.push(manager.txn.clone());
        self.shared.active_txns.put(manager.txn_id(), manager);
    }

    /// Spec §6 `Storage.unfetch`: walk every key a just-committed
    /// transaction touched and evict any whose numeric value exceeds
    /// `cold_cutoff` (spec §3 supplement, from the original's
    /// `UnfetchAll`).
    fn unfetch_cold_keys(&self, manager: &StorageManager) {
        for key in manager.txn.all_keys() {
            if let Some(value) = manager.cached_remote_read(key) {
                if parse_i64(value) > self.shared.cold_cutoff {
                    self.storage.unfetch(key);
                }
            }
        }
    }
}

fn parse_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    i64::from_le_bytes(buf)
}

/// Adaptive park-after-N-empty-polls backoff (spec §9 design note:
/// "Polling everywhere ... a rewrite should add adaptive backoff").
/// Behaviour under load is unchanged — this only reduces spin cost once
/// a worker has found nothing to do for a while.
fn backoff(idle_polls: u32) {
    if idle_polls < 100 {
        std::hint::spin_loop();
    } else {
        let micros = (idle_polls - 100).min(500);
        std::thread::sleep(std::time::Duration::from_micros(micros as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{ChannelMultiplexer, WORKER_CHANNEL};
    use calvindb_core::{Multiplexer, ReadContext, ReconBatch, ReconResult};
    use calvindb_storage::{CounterApp, InMemoryStorage};

    fn shared(app_node: NodeId) -> Arc<WorkerShared> {
        Arc::new(WorkerShared::new(
            app_node,
            i64::MAX,
            Arc::new(crate::recon::ReconEngine::new(app_node)),
            Arc::new(ThroughputSampler::new(10)),
        ))
    }

    struct NoRecon;
    impl ReconSource for NoRecon {
        fn try_recv(&self) -> Option<ReconBatch> {
            None
        }
    }

    fn make_worker(shared: Arc<WorkerShared>) -> (Worker, ChannelMultiplexer) {
        let hub = ChannelMultiplexer::new();
        let conn: Arc<dyn Connection> = Arc::from(hub.new_connection(WORKER_CHANNEL));
        let worker = Worker::new(0, shared, conn, Arc::new(CounterApp), Arc::new(InMemoryStorage::new()));
        (worker, hub)
    }

    #[test]
    fn committed_transaction_decrements_pending_and_leaves_no_active_entry() {
        let shared = shared(0);
        shared.pending_txns.store(1, Ordering::SeqCst);
        let mut txn = Txn::new(1, "incr");
        txn.read_write_set = vec!["ctr".to_string()];
        shared.txns_queue.push(txn);

        let (mut worker, _hub) = make_worker(Arc::clone(&shared));
        assert!(worker.tick(&NoRecon));

        assert_eq!(shared.pending_len(), 0);
        assert!(!shared.active_txns.contains(&1));
        assert_eq!(shared.throughput.total_committed(), 1);
    }

    struct SuspendOnce;
    impl Application for SuspendOnce {
        fn execute(&self, txn: &Txn, ctx: &ReadContext, storage: &dyn Storage) -> ExecResult {
            if storage.read(&"gate".to_string(), ctx).is_none() {
                return ExecResult::Suspended;
            }
            storage.write("ctr".to_string(), vec![1], txn.txn_id);
            ExecResult::Success
        }
        fn recon_execute(&self, _txn: &mut Txn, _ctx: &ReadContext, _storage: &dyn Storage) -> ReconResult {
            ReconResult::Success
        }
    }

    #[test]
    fn suspended_transaction_is_retained_in_active_map_not_requeued() {
        let shared = shared(0);
        shared.pending_txns.store(1, Ordering::SeqCst);
        let txn = Txn::new(7, "gated");
        shared.txns_queue.push(txn);

        let hub = ChannelMultiplexer::new();
        let conn: Arc<dyn Connection> = Arc::from(hub.new_connection(WORKER_CHANNEL));
        let mut worker = Worker::new(
            0,
            Arc::clone(&shared),
            conn,
            Arc::new(SuspendOnce),
            Arc::new(InMemoryStorage::new()),
        );
        assert!(worker.tick(&NoRecon));

        assert!(shared.active_txns.contains(&7));
        assert!(shared.txns_queue.is_empty());
        // Still pending — not committed, not aborted.
        assert_eq!(shared.pending_len(), 1);
    }

    #[test]
    fn read_result_resumes_suspended_transaction_from_any_worker() {
        let shared = shared(0);
        shared.pending_txns.store(1, Ordering::SeqCst);
        let storage = Arc::new(InMemoryStorage::new());
        let app: Arc<dyn Application> = Arc::new(SuspendOnce);

        // Suspend it directly via a manager, simulating "some other
        // worker" having done step 1 already.
        let mut manager = StorageManager::new(Txn::new(3, "gated"));
        let ctx = manager.read_context();
        let result = app.execute(&manager.txn, &ctx, storage.as_ref());
        assert_eq!(result, ExecResult::Suspended);
        shared.active_txns.put(3, manager);

        // The result is addressed by txn id (spec §6 `destination_channel`),
        // not by any particular worker's channel, and a fresh worker
        // (id 1, never having touched txn 3) is the one polling — this
        // is the "not pinned to the worker that suspended it" case.
        let hub = ChannelMultiplexer::new();
        let conn: Arc<dyn Connection> = Arc::from(hub.new_connection(WORKER_CHANNEL));
        hub.deliver(
            WORKER_CHANNEL,
            0,
            WorkerMessage::ReadResult {
                destination_channel: "3".to_string(),
                destination_node: 0,
                data: vec![calvindb_core::KeyValue {
                    key: "gate".to_string(),
                    value: b"open".to_vec(),
                }],
            },
        );

        let mut worker = Worker::new(1, Arc::clone(&shared), conn, app, storage.clone());
        assert!(worker.tick(&NoRecon));

        assert!(!shared.active_txns.contains(&3));
        assert_eq!(shared.pending_len(), 0);
        assert_eq!(storage.committed(&"ctr".to_string()), Some(vec![1]));
    }

    #[test]
    fn aborted_transaction_is_requeued_with_advanced_incarnation() {
        let shared = shared(0);
        let txn = Txn::new(4, "t");
        let mut manager = StorageManager::new(txn);
        manager.signal().set();
        shared.txns_queue.push(manager.txn.clone());
        shared.active_txns.put(4, manager);
        shared.pending_txns.store(1, Ordering::SeqCst);

        let (mut worker, _hub) = make_worker(Arc::clone(&shared));
        assert!(worker.tick(&NoRecon));

        // Re-enqueued, not committed: pending count is untouched, and a
        // fresh pop finds it back on the queue.
        assert_eq!(shared.pending_len(), 1);
        assert_eq!(shared.throughput.total_aborted(), 1);
        let requeued = shared.txns_queue.pop().expect("abort must requeue exactly once");
        assert_eq!(requeued.txn_id, 4);
    }

    #[test]
    fn tick_with_nothing_to_do_returns_false() {
        let shared = shared(0);
        let (mut worker, _hub) = make_worker(shared);
        assert!(!worker.tick(&NoRecon));
    }
}
