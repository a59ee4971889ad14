//! Reference/test-double implementation of `Storage` (spec §6 Non-goals:
//! the real storage engine is an external black box this core only
//! drives). Used by the integration tests and by applications that want
//! a working scheduler without standing up a real storage tier.
//!
//! The one piece of real design here is enforcing commit invariant I1
//! (commits on a given key land in ascending `txn_id` order) with a
//! per-key wait, directly mirroring the per-branch `commit_locks:
//! DashMap<BranchId, Mutex<()>>` TOCTOU-prevention pattern in
//! `examples/stratadb-labs-strata-core/crates/concurrency/src/manager.rs`
//! — generalized here from "one lock held across a check-then-write" to
//! "wait until my turn, keyed by transaction id" since multiple
//! transactions may have speculative pending writes on the same key at
//! once.
//!
//! A per-key wait on its own only orders commits against writes already
//! staged. Without knowing a lower `txn_id` is *going* to write a key
//! before it actually does, a reader or committer racing ahead of that
//! write has nothing to wait on. [`Storage::reserve`] closes that gap:
//! the dispatch loop calls it for every declared write key, in
//! `txn_id` order, before a transaction is ever handed to a worker —
//! the same "request every lock before the next transaction in order
//! may request any" rule as the original scheduler's deterministic
//! lock manager (`examples/original_source/src/scheduler/deterministic_scheduler.h`).
//! A reservation occupies a key's slot with `None` until the real write
//! lands; readers and committers block on `None` exactly as they would
//! on a slower writer, instead of sailing past it.

use calvindb_core::{CommitOutcome, Key, PendingReadEntry, ReadContext, Storage, TxnId, Value};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

struct KeyState {
    committed: Option<Value>,
    /// Uncommitted writes, ordered by writer's txn_id so the lowest
    /// pending id is always `pending.keys().next()`. `None` marks a
    /// reservation made at admission whose real write hasn't landed yet.
    pending: BTreeMap<TxnId, Option<Value>>,
    /// Dependents registered against a specific pending writer, fired
    /// if that writer discards instead of committing.
    dependents: HashMap<TxnId, Vec<PendingReadEntry>>,
}

impl KeyState {
    fn new() -> Self {
        KeyState {
            committed: None,
            pending: BTreeMap::new(),
            dependents: HashMap::new(),
        }
    }
}

struct KeyCell {
    state: Mutex<KeyState>,
    ready: Condvar,
}

impl KeyCell {
    fn new() -> Self {
        KeyCell {
            state: Mutex::new(KeyState::new()),
            ready: Condvar::new(),
        }
    }
}

/// An in-process, in-memory key/value store implementing [`Storage`].
pub struct InMemoryStorage {
    keys: DashMap<Key, Arc<KeyCell>>,
    txn_write_keys: DashMap<TxnId, Vec<Key>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        InMemoryStorage {
            keys: DashMap::new(),
            txn_write_keys: DashMap::new(),
        }
    }

    fn cell(&self, key: &Key) -> Arc<KeyCell> {
        self.keys
            .entry(key.clone())
            .or_insert_with(|| Arc::new(KeyCell::new()))
            .value()
            .clone()
    }

    /// Snapshot the committed value of `key`, bypassing dependency
    /// tracking. Convenience for assertions in tests.
    pub fn committed(&self, key: &Key) -> Option<Value> {
        self.keys.get(key).and_then(|c| c.state.lock().committed.clone())
    }
}

impl Storage for InMemoryStorage {
    fn read(&self, key: &Key, ctx: &ReadContext) -> Option<Value> {
        let cell = self.cell(key);
        let mut state = cell.state.lock();

        loop {
            match state.pending.range(..ctx.txn_id).next_back() {
                Some((&writer_id, Some(value))) => {
                    let value = value.clone();
                    state
                        .dependents
                        .entry(writer_id)
                        .or_default()
                        .push(PendingReadEntry {
                            depending_txn_id: ctx.txn_id,
                            signal: ctx.signal.clone(),
                            incarnation_at_read: ctx.incarnation,
                        });
                    return Some(value);
                }
                Some((_, None)) => {
                    // A lower txn_id has reserved this key but hasn't
                    // written it yet; wait rather than reading past it.
                    cell.ready.wait(&mut state);
                }
                None => return state.committed.clone(),
            }
        }
    }

    fn write(&self, key: Key, value: Value, txn_id: TxnId) {
        let cell = self.cell(&key);
        cell.state.lock().pending.insert(txn_id, Some(value));
        let mut keys = self.txn_write_keys.entry(txn_id).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
        drop(keys);
        cell.ready.notify_all();
    }

    fn reserve(&self, key: &Key, txn_id: TxnId) {
        let cell = self.cell(key);
        let mut state = cell.state.lock();
        state.pending.entry(txn_id).or_insert(None);
        let mut keys = self.txn_write_keys.entry(txn_id).or_default();
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }

    fn commit(&self, txn_id: TxnId) -> CommitOutcome {
        let Some((_, keys)) = self.txn_write_keys.remove(&txn_id) else {
            return CommitOutcome::Committed;
        };
        for key in keys {
            let cell = self.cell(&key);
            let mut state = cell.state.lock();
            loop {
                match state.pending.keys().next() {
                    Some(&lowest) if lowest == txn_id => break,
                    Some(&lowest) if lowest < txn_id => {
                        cell.ready.wait(&mut state);
                    }
                    _ => break, // our entry already resolved somehow; nothing to do
                }
            }
            if let Some(Some(value)) = state.pending.remove(&txn_id) {
                state.committed = Some(value);
            }
            state.dependents.remove(&txn_id);
            cell.ready.notify_all();
        }
        CommitOutcome::Committed
    }

    fn discard(&self, txn_id: TxnId) {
        let Some((_, keys)) = self.txn_write_keys.remove(&txn_id) else {
            return;
        };
        for key in keys {
            let cell = self.cell(&key);
            let mut state = cell.state.lock();
            state.pending.remove(&txn_id);
            let fired = state.dependents.remove(&txn_id);
            cell.ready.notify_all();
            drop(state);
            if let Some(deps) = fired {
                for dep in deps {
                    dep.try_trigger();
                }
            }
        }
    }

    fn unfetch(&self, _key: &Key) {
        // No page cache to evict from in this reference implementation.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calvindb_core::AbortSignal;

    fn ctx(txn_id: TxnId) -> ReadContext {
        ReadContext {
            txn_id,
            signal: AbortSignal::new(),
            incarnation: 0,
        }
    }

    #[test]
    fn read_before_any_write_is_none() {
        let s = InMemoryStorage::new();
        assert_eq!(s.read(&"k".to_string(), &ctx(1)), None);
    }

    #[test]
    fn write_then_commit_makes_value_visible_to_later_readers() {
        let s = InMemoryStorage::new();
        s.write("k".to_string(), b"v1".to_vec(), 1);
        assert_eq!(s.commit(1), CommitOutcome::Committed);
        assert_eq!(s.read(&"k".to_string(), &ctx(2)), Some(b"v1".to_vec()));
    }

    #[test]
    fn later_txn_reads_earlier_txns_pending_write() {
        let s = InMemoryStorage::new();
        s.write("k".to_string(), b"from-1".to_vec(), 1);
        // txn 2 reads before txn 1 commits: sees the speculative value.
        assert_eq!(s.read(&"k".to_string(), &ctx(2)), Some(b"from-1".to_vec()));
    }

    #[test]
    fn discard_cascades_abort_to_dependent_reader() {
        let s = InMemoryStorage::new();
        s.write("k".to_string(), b"from-1".to_vec(), 1);
        let reader_signal = AbortSignal::new();
        let reader_ctx = ReadContext {
            txn_id: 2,
            signal: reader_signal.clone(),
            incarnation: 0,
        };
        s.read(&"k".to_string(), &reader_ctx);
        assert!(!reader_signal.is_set());

        s.discard(1);
        assert!(reader_signal.is_set(), "abort must cascade to the dependent reader");
    }

    #[test]
    fn reader_blocks_on_a_reservation_until_the_real_write_lands() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let s = StdArc::new(InMemoryStorage::new());
        // txn 1 reserves "k" at admission but hasn't executed yet.
        s.reserve(&"k".to_string(), 1);

        let s2 = StdArc::clone(&s);
        let reader = thread::spawn(move || s2.read(&"k".to_string(), &ctx(2)));

        thread::sleep(std::time::Duration::from_millis(20));
        s.write("k".to_string(), b"from-1".to_vec(), 1);

        assert_eq!(reader.join().unwrap(), Some(b"from-1".to_vec()));
    }

    #[test]
    fn commits_on_same_key_apply_in_ascending_txn_id_order() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let s = StdArc::new(InMemoryStorage::new());
        s.write("k".to_string(), b"v1".to_vec(), 1);
        s.write("k".to_string(), b"v2".to_vec(), 2);

        let order = StdArc::new(Mutex::new(Vec::new()));

        let s2 = StdArc::clone(&s);
        let order2 = StdArc::clone(&order);
        let committer_2 = thread::spawn(move || {
            s2.commit(2);
            order2.lock().push(2u64);
        });

        // Give the txn-2 committer a chance to run first; it must still
        // block behind txn 1 regardless of scheduling.
        thread::sleep(std::time::Duration::from_millis(20));
        s.commit(1);
        order.lock().push(1);

        committer_2.join().unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
        assert_eq!(s.committed(&"k".to_string()), Some(b"v2".to_vec()));
    }
}
