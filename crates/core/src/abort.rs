//! Abort-bit / abort-counter signalling primitive (spec §3, §9).
//!
//! The source system expresses "transaction X should abort" as a
//! single-word atomic flag observed by X's own worker and by anyone who
//! read a value dependent on X. The companion counter disambiguates
//! successive incarnations of the same logical transaction: a signal aimed
//! at incarnation 2 must not be honoured by incarnation 3, which is why
//! every dependency record also captures the incarnation it was taken
//! against (spec §3 "whenever a value is invalidated ... every
//! `ReadFromEntry` whose `num_aborted` equals the current counter is
//! triggered exactly once").

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A shared abort flag plus incarnation counter for one logical
/// transaction. Cheaply cloneable; clones share the same underlying
/// atomics.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    bit: Arc<AtomicBool>,
    incarnation: Arc<AtomicU64>,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// Create a fresh signal at incarnation 0, not aborted.
    pub fn new() -> Self {
        AbortSignal {
            bit: Arc::new(AtomicBool::new(false)),
            incarnation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The incarnation this signal is currently on.
    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::Acquire)
    }

    /// True if the abort bit is currently set for the current incarnation.
    pub fn is_set(&self) -> bool {
        self.bit.load(Ordering::Acquire)
    }

    /// Set the abort bit. Returns `true` if this call is the one that
    /// actually transitioned it (false if it was already set) — callers
    /// use this to guarantee "triggered exactly once" semantics.
    pub fn set(&self) -> bool {
        !self.bit.swap(true, Ordering::AcqRel)
    }

    /// Clear the abort bit and advance to the next incarnation. Returns
    /// the new incarnation number. Called by the worker that re-runs a
    /// transaction after observing an abort.
    pub fn begin_next_incarnation(&self) -> u64 {
        self.bit.store(false, Ordering::Release);
        self.incarnation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Dependency record registered when transaction `depending_txn_id` reads
/// a value written (but not yet committed) by an earlier transaction.
///
/// Invariant (spec §3): whenever the value it depends on is invalidated
/// (the writer aborts, or is superseded), the record fires exactly once —
/// `try_trigger` only succeeds if the depending transaction hasn't already
/// moved on to a newer incarnation since the read happened, and flips the
/// bit via [`AbortSignal::set`], whose own swap guarantees at-most-once.
#[derive(Debug, Clone)]
pub struct ReadFromEntry {
    /// The transaction that performed the dependent read.
    pub depending_txn_id: u64,
    /// Handle into the depending transaction's abort state.
    pub signal: AbortSignal,
    /// The incarnation of `signal` at the moment the read happened.
    pub incarnation_at_read: u64,
}

impl ReadFromEntry {
    /// Attempt to cascade an abort onto the depending transaction. Returns
    /// `true` iff this call actually triggered it.
    pub fn try_trigger(&self) -> bool {
        if self.signal.incarnation() == self.incarnation_at_read {
            self.signal.set()
        } else {
            false
        }
    }
}

/// Dependency record held alongside a specific pending (uncommitted)
/// storage slot, analogous to [`ReadFromEntry`] but keyed by the slot
/// rather than by the writer's transaction id (spec §3). Used by storage
/// implementations that track per-value readers rather than per-writer
/// readers.
#[derive(Debug, Clone)]
pub struct PendingReadEntry {
    /// The transaction that performed the dependent read.
    pub depending_txn_id: u64,
    /// Handle into the depending transaction's abort state.
    pub signal: AbortSignal,
    /// The incarnation of `signal` at the moment the read happened.
    pub incarnation_at_read: u64,
}

impl PendingReadEntry {
    /// Attempt to cascade an abort onto the depending transaction. Returns
    /// `true` iff this call actually triggered it.
    pub fn try_trigger(&self) -> bool {
        if self.signal.incarnation() == self.incarnation_at_read {
            self.signal.set()
        } else {
            false
        }
    }
}
