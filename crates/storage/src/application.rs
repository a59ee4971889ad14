//! A minimal demonstration [`Application`] used by this workspace's
//! integration tests — not part of the scheduler core itself (spec §1
//! Non-goals: application procedures are supplied by the embedder).
//!
//! `CounterApp` treats every key in a transaction's `read_write_set` as
//! an 8-byte little-endian counter and increments it by one. It exists
//! to exercise contention on a single key (spec §8 scenario: many
//! transactions racing on one counter must still serialize correctly
//! under the scheduler's determinism guarantee) without requiring a
//! real application layer.

use calvindb_core::{Application, ExecResult, ReadContext, ReconResult, Storage, Txn};

/// Increments every key in `read_write_set` by one, reading the prior
/// value (defaulting to zero if unset) first.
pub struct CounterApp;

fn decode_counter(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    i64::from_le_bytes(buf)
}

impl Application for CounterApp {
    fn execute(&self, txn: &Txn, ctx: &ReadContext, storage: &dyn Storage) -> ExecResult {
        for key in &txn.read_write_set {
            let current = storage.read(key, ctx).map(|v| decode_counter(&v)).unwrap_or(0);
            storage.write(key.clone(), (current + 1).to_le_bytes().to_vec(), txn.txn_id);
        }
        ExecResult::Success
    }

    /// `CounterApp` never needs discovery — its key sets are fixed up
    /// front — so reconnaissance is a trivial pass-through.
    fn recon_execute(&self, _txn: &mut Txn, _ctx: &ReadContext, _storage: &dyn Storage) -> ReconResult {
        ReconResult::Success
    }
}

/// Demonstrates dependent-transaction reconnaissance (spec §4.4): the
/// transaction's `read_set` names a single "pointer" key whose value is
/// the name of the real key to touch; `recon_execute` resolves that
/// indirection into `read_write_set` so the sequencer can compute a
/// definite key set before scheduling the transaction for real
/// execution. Grounded on the conditional-write pattern the original
/// Calvin scheduler's reconnaissance pass exists to support.
pub struct IndirectCounterApp;

impl Application for IndirectCounterApp {
    fn execute(&self, txn: &Txn, ctx: &ReadContext, storage: &dyn Storage) -> ExecResult {
        for key in &txn.read_write_set {
            let current = storage.read(key, ctx).map(|v| decode_counter(&v)).unwrap_or(0);
            storage.write(key.clone(), (current + 1).to_le_bytes().to_vec(), txn.txn_id);
        }
        ExecResult::Success
    }

    fn recon_execute(&self, txn: &mut Txn, ctx: &ReadContext, storage: &dyn Storage) -> ReconResult {
        let Some(pointer_key) = txn.read_set.first().cloned() else {
            return ReconResult::Other;
        };
        let Some(target_bytes) = storage.read(&pointer_key, ctx) else {
            return ReconResult::Other;
        };
        let Ok(target_key) = String::from_utf8(target_bytes) else {
            return ReconResult::Other;
        };
        if !txn.read_write_set.contains(&target_key) {
            txn.read_write_set.push(target_key);
        }
        ReconResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmemory::InMemoryStorage;
    use calvindb_core::AbortSignal;

    fn ctx(txn_id: u64) -> ReadContext {
        ReadContext {
            txn_id,
            signal: AbortSignal::new(),
            incarnation: 0,
        }
    }

    #[test]
    fn counter_app_starts_at_one_from_empty_storage() {
        let storage = InMemoryStorage::new();
        let mut txn = Txn::new(1, "incr");
        txn.read_write_set = vec!["ctr".to_string()];
        let app = CounterApp;

        let result = app.execute(&txn, &ctx(1), &storage);
        assert_eq!(result, ExecResult::Success);
        storage.commit(1);
        assert_eq!(storage.committed(&"ctr".to_string()), Some(1i64.to_le_bytes().to_vec()));
    }

    #[test]
    fn repeated_increments_accumulate_in_commit_order() {
        let storage = InMemoryStorage::new();
        let app = CounterApp;

        for id in 1..=5u64 {
            let mut txn = Txn::new(id, "incr");
            txn.read_write_set = vec!["ctr".to_string()];
            app.execute(&txn, &ctx(id), &storage);
            storage.commit(id);
        }
        assert_eq!(storage.committed(&"ctr".to_string()), Some(5i64.to_le_bytes().to_vec()));
    }

    #[test]
    fn indirect_app_resolves_pointer_during_recon() {
        let storage = InMemoryStorage::new();
        storage.write("ptr".to_string(), b"real-key".to_vec(), 0);
        storage.commit(0);

        let mut txn = Txn::new(1, "cond-incr");
        txn.read_set = vec!["ptr".to_string()];
        let app = IndirectCounterApp;

        let result = app.recon_execute(&mut txn, &ctx(1), &storage);
        assert_eq!(result, ReconResult::Success);
        assert_eq!(txn.read_write_set, vec!["real-key".to_string()]);
    }
}
