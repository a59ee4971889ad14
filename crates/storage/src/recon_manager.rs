//! Reconnaissance execution state (spec §4.4), grounded on the original
//! scheduler's handling of `recon_txns`/`RECON_READ_RESULT`: a dependent
//! transaction's read/write set is discovered by running read-only
//! probes that can themselves suspend on a remote read, so this needs
//! the same suspend/resume bookkeeping as [`crate::manager::StorageManager`]
//! but against a transaction whose key sets are still being filled in.

use calvindb_core::{AbortSignal, Key, KeyValue, ReadContext, ReconResult, TxnId, Txn, Value};
use std::collections::HashMap;

/// Tracks one dependent transaction's reconnaissance pass.
pub struct ReconStorageManager {
    /// The transaction being probed. Its `read_set`/`write_set`/
    /// `read_write_set` are populated incrementally as probes resolve.
    pub txn: Txn,
    /// The outcome of the most recent `recon_execute` call against this
    /// manager, if any has run yet. The caller (the recon engine) is
    /// responsible for clearing this back to `None` once it has acted
    /// on a suspended result — it exists so `run`/`finish_if_resolved`
    /// in `calvindb-scheduler::recon` can be split into two calls
    /// without threading the result through a return value and a map
    /// entry at once.
    pub last_result: Option<ReconResult>,
    signal: AbortSignal,
    remote_reads: HashMap<Key, Value>,
}

impl ReconStorageManager {
    /// Begin a reconnaissance pass for a dependent transaction.
    pub fn new(txn: Txn) -> Self {
        ReconStorageManager {
            txn,
            last_result: None,
            signal: AbortSignal::new(),
            remote_reads: HashMap::new(),
        }
    }

    /// This transaction's id.
    pub fn txn_id(&self) -> TxnId {
        self.txn.txn_id
    }

    /// Build a [`ReadContext`] for a probe read made on behalf of this
    /// transaction.
    pub fn read_context(&self) -> ReadContext {
        ReadContext {
            txn_id: self.txn.txn_id,
            signal: self.signal.clone(),
            incarnation: self.signal.incarnation(),
        }
    }

    /// Record a remote probe result.
    pub fn apply_read_result(&mut self, results: &[KeyValue]) {
        for kv in results {
            self.remote_reads.insert(kv.key.clone(), kv.value.clone());
        }
    }

    /// A previously satisfied probe read, if any.
    pub fn cached_remote_read(&self, key: &Key) -> Option<&Value> {
        self.remote_reads.get(key)
    }

    /// Every remote probe result accumulated while suspended, for
    /// overlaying on top of local storage when the probe resumes.
    pub fn remote_reads(&self) -> &HashMap<Key, Value> {
        &self.remote_reads
    }

    /// True only for the node designated to reply with this
    /// transaction's resolved key sets (spec §4.4: `readers[0] ==
    /// this_node_id`).
    pub fn is_designated_responder(&self, this_node_id: calvindb_core::NodeId) -> bool {
        self.txn.designated_responder() == Some(this_node_id)
    }
}
