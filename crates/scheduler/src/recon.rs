//! Reconnaissance engine (spec §2 C4, §4.4), grounded on the original
//! scheduler's handling of `recon_txns_` / `recon_pending_txns_` /
//! `RECON_INDEX_REPLY` in
//! `examples/original_source/src/scheduler/deterministic_scheduler.cc`.
//!
//! A dependent transaction's real read/write set can't be known until a
//! read-only probe runs against storage (e.g. resolving an index lookup).
//! Per spec §4.5, draining the inbound recon batch channel (cheap:
//! parse and enqueue) is kept separate from actually running a probe
//! (`recon_execute`, potentially expensive and itself suspendable) so
//! the cost of probing is spread across worker iterations rather than
//! paid all at once when a batch arrives.

use calvindb_core::{
    Application, KeyValue, NodeId, ReconBatch, ReconIndexReply, ReconResult, Storage, Txn,
    TxnId, WorkerMessage,
};
use calvindb_queue::AtomicQueue;
use calvindb_storage::ReconStorageManager;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Anything that can hand back the next inbound batch of dependent
/// transactions, in the style of `calvindb_queue::BatchSource` but
/// polling rather than blocking (spec §4.5 step 4 drains without
/// waiting).
pub trait ReconSource: Send + Sync {
    /// Non-blocking receive of the next recon batch, if any is queued.
    fn try_recv(&self) -> Option<ReconBatch>;
}

/// Reconnaissance state shared across every worker: the queue of
/// not-yet-probed dependent transactions (step 4 feeds it, step 3
/// drains it), the suspended-probe table keyed by transaction id, and
/// the cumulative reply buffer guarded by `reply` (spec §4.4: "a shared
/// mutex serialises appends to the single reply buffer across
/// workers").
pub struct ReconEngine {
    this_node_id: NodeId,
    recon_txns: AtomicQueue<Txn>,
    pending: Mutex<HashMap<TxnId, ReconStorageManager>>,
    reply: Mutex<ReconIndexReply>,
}

impl ReconEngine {
    /// Create an engine for node `this_node_id`, with an empty reply
    /// buffer ready to accumulate resolved transactions.
    pub fn new(this_node_id: NodeId) -> Self {
        ReconEngine {
            this_node_id,
            recon_txns: AtomicQueue::new(),
            pending: Mutex::new(HashMap::new()),
            reply: Mutex::new(ReconIndexReply {
                destination_channel: "sequencer".to_string(),
                destination_node: this_node_id,
                data: Vec::new(),
            }),
        }
    }

    /// Drain one waiting batch off `source`, parsing each carried
    /// transaction and pushing it onto `recon_txns` (spec §4.5 step 4).
    /// Returns the number of transactions admitted; `0` if no batch was
    /// waiting.
    pub fn drain_channel(&self, source: &dyn ReconSource) -> usize {
        let Some(batch) = source.try_recv() else {
            return 0;
        };
        self.ingest(&batch)
    }

    /// Parse and enqueue every transaction in `batch` without running
    /// any probe yet. Exposed directly (as well as via
    /// [`Self::drain_channel`]) so tests and demo code can feed batches
    /// without standing up a [`ReconSource`].
    pub fn ingest(&self, batch: &ReconBatch) -> usize {
        let mut admitted = 0;
        for bytes in &batch.data {
            match Txn::decode(bytes) {
                Ok(txn) => {
                    self.recon_txns.push(txn);
                    admitted += 1;
                }
                Err(err) => warn!(error = %err, "failed to decode recon transaction, dropping"),
            }
        }
        admitted
    }

    /// Pop one transaction off `recon_txns` and run its reconnaissance
    /// probe for the first time (spec §4.5 step 3). Returns `false` if
    /// the queue was empty.
    pub fn run_one(&self, application: &dyn Application, storage: &dyn Storage) -> bool {
        let Some(txn) = self.recon_txns.pop() else {
            return false;
        };
        let mut manager = ReconStorageManager::new(txn);
        self.run(&mut manager, application, storage);
        self.finish_if_resolved(manager);
        true
    }

    /// Run (or re-run) `recon_execute` against `manager`, stashing the
    /// outcome in `manager.last_result` for [`Self::finish_if_resolved`]
    /// to act on.
    fn run(&self, manager: &mut ReconStorageManager, application: &dyn Application, storage: &dyn Storage) {
        let ctx = manager.read_context();
        let overlay = manager.remote_reads().clone();
        let view = calvindb_storage::OverlayStorage::new(storage, &overlay);
        let result = application.recon_execute(&mut manager.txn, &ctx, &view);
        manager.last_result = Some(result);
    }

    /// After `run`, either finalize `manager` (success, replied if we're
    /// the designated responder; or a hard failure, discarded) or leave
    /// it stored under its txn id in `pending` if it suspended.
    fn finish_if_resolved(&self, mut manager: ReconStorageManager) {
        match manager.last_result {
            Some(ReconResult::Success) => self.reply_if_responder(&manager),
            Some(ReconResult::Suspended) => {
                let txn_id = manager.txn_id();
                manager.last_result = None;
                self.pending.lock().insert(txn_id, manager);
            }
            _ => debug!(
                txn_id = manager.txn_id(),
                "recon transaction unresolvable, discarding silently"
            ),
        }
    }

    /// Handle a `RECON_READ_RESULT` message: apply the delivered values
    /// to the waiting manager and resume its probe. Returns `false` if
    /// no probe is waiting on `txn_id` (already resolved, or a stale
    /// duplicate message).
    pub fn handle_read_result(
        &self,
        txn_id: TxnId,
        data: &[KeyValue],
        application: &dyn Application,
        storage: &dyn Storage,
    ) -> bool {
        let Some(mut manager) = self.pending.lock().remove(&txn_id) else {
            trace!(txn_id, "recon read result for unknown/already-resolved transaction");
            return false;
        };
        manager.apply_read_result(data);
        self.run(&mut manager, application, storage);
        self.finish_if_resolved(manager);
        true
    }

    /// Number of reconnaissance probes currently suspended awaiting a
    /// remote read.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of transactions admitted but not yet probed.
    pub fn queued_len(&self) -> usize {
        self.recon_txns.len()
    }

    fn reply_if_responder(&self, manager: &ReconStorageManager) {
        if !manager.is_designated_responder(self.this_node_id) {
            return;
        }
        let Ok(bytes) = manager.txn.encode() else {
            warn!(txn_id = manager.txn_id(), "failed to encode resolved recon transaction");
            return;
        };
        self.reply.lock().data.push(bytes);
    }

    /// Drain the accumulated reply buffer, if it has any entries,
    /// returning a message ready to send to the `"sequencer"` channel
    /// (spec §4.4 step 4). Leaves a fresh empty buffer behind.
    pub fn take_reply(&self) -> Option<WorkerMessage> {
        let mut reply = self.reply.lock();
        if reply.data.is_empty() {
            return None;
        }
        let taken = std::mem::replace(
            &mut *reply,
            ReconIndexReply {
                destination_channel: "sequencer".to_string(),
                destination_node: self.this_node_id,
                data: Vec::new(),
            },
        );
        Some(WorkerMessage::ReconIndexReply(taken))
    }
}

/// Shared handle type used by the worker pool (every worker drains the
/// same recon batch channel and probes transactions from the same
/// queue, spec §4.5).
pub type SharedReconEngine = Arc<ReconEngine>;
