//! Narrow collaborator traits the scheduler core depends on (spec §1, §6).
//!
//! Nothing in this crate implements these — storage, connection, and
//! multiplexer are all external black boxes (spec §1 Non-goals). Keeping
//! them here, rather than in `calvindb-storage`, lets `calvindb-scheduler`
//! depend on the trait without depending on any concrete implementation.

use crate::abort::AbortSignal;
use crate::error::Result;
use crate::types::{Key, NodeId, TxnId, Value};

/// Context a read is performed under. Carries enough of the caller's
/// transaction identity for a `Storage` implementation to register a
/// dependency (spec §3 `ReadFromEntry`/`PendingReadEntry`) against the
/// value it returns, so that a later abort of the writer can cascade.
///
/// This widens spec §6's single-argument `Storage.read(key)` signature;
/// see the design ledger for why the extra context is additive rather
/// than a change in meaning.
#[derive(Debug, Clone)]
pub struct ReadContext {
    /// The transaction performing the read.
    pub txn_id: TxnId,
    /// That transaction's abort signal, to register a dependency against.
    pub signal: AbortSignal,
    /// The signal's incarnation at the moment of the read.
    pub incarnation: u64,
}

/// The external, possibly-distributed key/value store the scheduler
/// core drives but never implements (spec §1, §6).
///
/// Implementations decide their own concurrency strategy internally;
/// the scheduler's contract with them is purely the method signatures
/// below; the scheduler does not acquire any lock on their behalf.
pub trait Storage: Send + Sync {
    /// Read the current value of `key`, registering `ctx` as a dependent
    /// reader so a later abort of whoever wrote it can cascade onto
    /// `ctx.txn_id`. Returns `None` if the key has never been written.
    fn read(&self, key: &Key, ctx: &ReadContext) -> Option<Value>;

    /// Stage a write. Not yet visible to other readers until `commit`.
    fn write(&self, key: Key, value: Value, txn_id: TxnId);

    /// Commit all writes staged under `txn_id`, in ascending `txn_id`
    /// order relative to other commits on the same keys (spec invariant
    /// I1). Returns `Aborted` if the abort bit was observed set instead.
    fn commit(&self, txn_id: TxnId) -> crate::types::CommitOutcome;

    /// Discard all writes staged under `txn_id` without applying them.
    fn discard(&self, txn_id: TxnId);

    /// Declare, ahead of execution, that `txn_id` will write `key` (spec
    /// §3 "Lock queue entry"). Called by the dispatch loop at admission
    /// time, in global `txn_id` order, for every key in a transaction's
    /// declared write sets — mirroring the original scheduler's
    /// deterministic lock manager, which requests every lock a
    /// transaction will need before the next transaction in order may
    /// request any (see the design ledger). Implementations that don't
    /// need an admission-time reservation to honor commit ordering (spec
    /// invariant I1) may leave this a no-op.
    fn reserve(&self, _key: &Key, _txn_id: TxnId) {}

    /// Hint that `key` is cold and may be evicted from any in-memory
    /// cache the implementation keeps (spec §6, cold-key eviction).
    fn unfetch(&self, _key: &Key) {}
}

/// The application-defined transaction procedure the scheduler drives
/// (spec §6).
pub trait Application: Send + Sync {
    /// Run `txn`'s procedure body against `storage`. `ctx` carries the
    /// abort signal reads should register against; implementations pass
    /// it straight through to every `storage.read` call (cloning it
    /// with an updated `txn_id`/`incarnation` is the caller's job, not
    /// the application's). The implementation is responsible for
    /// calling `storage.read`/`storage.write` for every key in the
    /// transaction's declared sets.
    fn execute(
        &self,
        txn: &crate::types::Txn,
        ctx: &ReadContext,
        storage: &dyn Storage,
    ) -> crate::types::ExecResult;

    /// Run the reconnaissance pass for a dependent transaction,
    /// discovering its true read/write set (spec §4.4). Implementations
    /// typically perform read-only probes and populate `txn`'s key sets
    /// as a side effect before returning `Success`.
    fn recon_execute(
        &self,
        txn: &mut crate::types::Txn,
        ctx: &ReadContext,
        storage: &dyn Storage,
    ) -> crate::types::ReconResult;
}

/// One inbound or outbound channel a worker or the dispatch thread
/// reads/writes (spec §6). Analogous to the original scheduler's
/// per-thread `Connection` abstraction over its network multiplexer.
pub trait Connection: Send {
    /// Non-blocking receive of the next message, if any is queued.
    fn try_receive(&self) -> Option<crate::types::WorkerMessage>;

    /// Send a message to another node.
    fn send(&self, destination: NodeId, message: crate::types::WorkerMessage) -> Result<()>;
}

/// Creates named [`Connection`]s on demand (spec §6, analogous to the
/// original scheduler's `Multiplexer::NewConnection`).
pub trait Multiplexer: Send + Sync {
    /// Open (or attach to) a connection identified by `channel_name`.
    fn new_connection(&self, channel_name: &str) -> Box<dyn Connection>;
}
