//! Layers a transaction's accumulated remote-read results on top of the
//! local [`Storage`] view it resumes against (spec §4.5 step 2: "if the
//! manager already has a full transaction object attached, rerun the
//! application from the suspension point").
//!
//! Without this, a resumed `Application::execute`/`recon_execute` call
//! would re-issue the same read against local storage and suspend
//! again forever — the whole point of caching `READ_RESULT`/
//! `RECON_READ_RESULT` data in the manager is so the re-run sees it.

use calvindb_core::{CommitOutcome, Key, ReadContext, Storage, TxnId, Value};
use std::collections::HashMap;

/// A read-through view: checks `overlay` first, falls through to
/// `inner` for anything not satisfied by a prior remote read. Writes,
/// commits, and discards always go straight to `inner`.
pub struct OverlayStorage<'a> {
    inner: &'a dyn Storage,
    overlay: &'a HashMap<Key, Value>,
}

impl<'a> OverlayStorage<'a> {
    /// Wrap `inner` with `overlay` on top.
    pub fn new(inner: &'a dyn Storage, overlay: &'a HashMap<Key, Value>) -> Self {
        OverlayStorage { inner, overlay }
    }
}

impl Storage for OverlayStorage<'_> {
    fn read(&self, key: &Key, ctx: &ReadContext) -> Option<Value> {
        if let Some(value) = self.overlay.get(key) {
            return Some(value.clone());
        }
        self.inner.read(key, ctx)
    }

    fn write(&self, key: Key, value: Value, txn_id: TxnId) {
        self.inner.write(key, value, txn_id);
    }

    fn commit(&self, txn_id: TxnId) -> CommitOutcome {
        self.inner.commit(txn_id)
    }

    fn discard(&self, txn_id: TxnId) {
        self.inner.discard(txn_id);
    }

    fn reserve(&self, key: &Key, txn_id: TxnId) {
        self.inner.reserve(key, txn_id);
    }

    fn unfetch(&self, key: &Key) {
        self.inner.unfetch(key);
    }
}
