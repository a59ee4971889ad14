//! Per-transaction execution state carried across suspend/resume cycles
//! (spec §3, §4.5). Grounded on the original scheduler's
//! `StorageManager`, which the worker loop looks up by transaction id in
//! `active_txns` on every iteration before trying anything else.

use calvindb_core::{AbortSignal, Key, KeyValue, ReadContext, TxnId, Txn, Value};
use std::collections::HashMap;

/// Tracks one transaction's abort state and any remote read results it
/// has received while suspended, so re-entering `Application::execute`
/// after a resume picks up exactly where it left off.
pub struct StorageManager {
    /// The transaction this manager drives.
    pub txn: Txn,
    signal: AbortSignal,
    remote_reads: HashMap<Key, Value>,
}

impl StorageManager {
    /// Begin tracking a freshly admitted transaction.
    pub fn new(txn: Txn) -> Self {
        StorageManager {
            txn,
            signal: AbortSignal::new(),
            remote_reads: HashMap::new(),
        }
    }

    /// This transaction's id.
    pub fn txn_id(&self) -> TxnId {
        self.txn.txn_id
    }

    /// The abort signal this transaction's reads should register
    /// against.
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Build a [`ReadContext`] for a `Storage::read` call made on
    /// behalf of this transaction at its current incarnation.
    pub fn read_context(&self) -> ReadContext {
        ReadContext {
            txn_id: self.txn.txn_id,
            signal: self.signal.clone(),
            incarnation: self.signal.incarnation(),
        }
    }

    /// True if this transaction's abort bit is currently set.
    pub fn is_aborted(&self) -> bool {
        self.signal.is_set()
    }

    /// Record a remote read result so a resumed execution can see it
    /// without a second round trip.
    pub fn apply_read_result(&mut self, results: &[KeyValue]) {
        for kv in results {
            self.remote_reads.insert(kv.key.clone(), kv.value.clone());
        }
    }

    /// A previously satisfied remote read, if any.
    pub fn cached_remote_read(&self, key: &Key) -> Option<&Value> {
        self.remote_reads.get(key)
    }

    /// Every remote read result this transaction has accumulated while
    /// suspended, so a resumed execution can be overlaid on top of
    /// local storage (spec §4.5 step 2: "rerun the application from the
    /// suspension point").
    pub fn remote_reads(&self) -> &HashMap<Key, Value> {
        &self.remote_reads
    }

    /// Reset for a new incarnation after observing an abort: clears
    /// cached remote reads (the re-run may take a different path) and
    /// advances the abort signal so stale cascades from the previous
    /// incarnation no longer apply.
    pub fn restart(&mut self) {
        self.remote_reads.clear();
        self.signal.begin_next_incarnation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manager_is_not_aborted_and_has_no_cached_reads() {
        let m = StorageManager::new(Txn::new(1, "t"));
        assert!(!m.is_aborted());
        assert_eq!(m.cached_remote_read(&"k".to_string()), None);
    }

    #[test]
    fn apply_read_result_populates_cache() {
        let mut m = StorageManager::new(Txn::new(1, "t"));
        m.apply_read_result(&[KeyValue {
            key: "k".to_string(),
            value: b"v".to_vec(),
        }]);
        assert_eq!(m.cached_remote_read(&"k".to_string()), Some(&b"v".to_vec()));
    }

    #[test]
    fn restart_clears_cache_and_advances_incarnation() {
        let mut m = StorageManager::new(Txn::new(1, "t"));
        m.apply_read_result(&[KeyValue {
            key: "k".to_string(),
            value: b"v".to_vec(),
        }]);
        let before = m.read_context().incarnation;
        m.restart();
        assert_eq!(m.cached_remote_read(&"k".to_string()), None);
        assert_eq!(m.read_context().incarnation, before + 1);
        assert!(!m.is_aborted());
    }
}
