//! Shared data types for the deterministic scheduler core.
//!
//! These mirror spec §3 (Data Model): the transaction envelope, batch
//! envelope, and the small worker-channel message shapes described in §6.

use serde::{Deserialize, Serialize};

/// Globally unique, monotonic (across the sequencer) transaction identifier.
pub type TxnId = u64;

/// Identifier of a node in the cluster.
pub type NodeId = u32;

/// A storage key. Keys are string-like per spec §3.
pub type Key = String;

/// An opaque value stored against a [`Key`]. The scheduler core never
/// interprets value bytes — that is the application layer's job.
pub type Value = Vec<u8>;

/// Lifecycle state of a transaction (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Popped from `txns_queue` but not yet handed to the application.
    Fresh,
    /// Currently inside `Application::execute`.
    Executing,
    /// Waiting on a remote read result; manager lives in the active map.
    Suspended,
    /// Committed to storage; manager has been destroyed.
    Committed,
    /// Permanently failed (application returned `Failure`); not retried.
    Aborted,
}

/// The unit of work scheduled by this core.
///
/// `payload` carries whatever application-specific instruction data the
/// sequencer attached (analogous to the extra opaque fields a real
/// `TxnProto` carries beyond the key sets this core cares about) — the
/// scheduler never reads it, only forwards it to `Application::execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Txn {
    /// Globally unique, monotonic transaction id.
    pub txn_id: TxnId,
    /// Application-defined transaction type tag.
    pub txn_type: String,
    /// Keys this transaction only reads.
    pub read_set: Vec<Key>,
    /// Keys this transaction only writes.
    pub write_set: Vec<Key>,
    /// Keys this transaction both reads and writes.
    pub read_write_set: Vec<Key>,
    /// Node ids that will read this transaction's outputs. `readers[0]` is
    /// the designated responder for reconnaissance replies (spec §4.4).
    pub readers: Vec<NodeId>,
    /// Node ids that will write this transaction's outputs.
    pub writers: Vec<NodeId>,
    /// Microsecond timestamp stamped by the dispatch loop the first time
    /// this transaction is admitted. `0` means "not yet stamped".
    pub start_time: u64,
    /// Opaque seed used for latency sampling (`seed % SAMPLE_RATE == 0`
    /// selects sampled transactions, per the original scheduler).
    pub seed: u64,
    /// Current lifecycle state.
    pub status: TxnStatus,
    /// True for dependent transactions whose read/write set must be
    /// discovered via reconnaissance (spec §4.4) before normal execution.
    pub is_dependent: bool,
    /// Opaque application payload (arguments, procedure id, etc).
    pub payload: Vec<u8>,
}

impl Txn {
    /// Build a fresh transaction with empty key sets, ready for a test or
    /// for an application to populate before handing to the dispatch loop.
    pub fn new(txn_id: TxnId, txn_type: impl Into<String>) -> Self {
        Txn {
            txn_id,
            txn_type: txn_type.into(),
            read_set: Vec::new(),
            write_set: Vec::new(),
            read_write_set: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
            start_time: 0,
            seed: 0,
            status: TxnStatus::Fresh,
            is_dependent: false,
            payload: Vec::new(),
        }
    }

    /// The designated responder for this transaction's reconnaissance
    /// reply, if it has any declared readers (spec §4.4).
    pub fn designated_responder(&self) -> Option<NodeId> {
        self.readers.first().copied()
    }

    /// All keys this transaction will touch, reads and writes combined.
    pub fn all_keys(&self) -> impl Iterator<Item = &Key> {
        self.read_set
            .iter()
            .chain(self.write_set.iter())
            .chain(self.read_write_set.iter())
    }

    /// Serialise for wire transport (spec §6: batches and recon replies
    /// carry transactions as opaque bytes).
    pub fn encode(&self) -> crate::error::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialise a transaction encoded with [`Txn::encode`].
    pub fn decode(bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// An ordered batch of serialised transactions (spec §6, `TXN_BATCH`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Monotonic batch sequence number assigned by the sequencer.
    pub batch_number: u64,
    /// Serialised transactions, in the order they must be admitted.
    pub data: Vec<Vec<u8>>,
}

impl Batch {
    /// Decode every entry in `data` as a [`Txn`], in order. Fails on the
    /// first entry that doesn't decode.
    pub fn decode_txns(&self) -> crate::error::Result<Vec<Txn>> {
        self.data.iter().map(|bytes| Txn::decode(bytes)).collect()
    }
}

/// An unordered collection of dependent transactions shipped for
/// reconnaissance (spec §4.4, §6 "RECON_BATCH-like").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconBatch {
    /// Serialised dependent transactions.
    pub data: Vec<Vec<u8>>,
}

/// A key/value pair satisfying a pending remote read (spec §6 `data[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValue {
    /// The key that was read remotely.
    pub key: Key,
    /// The value that satisfies the read.
    pub value: Value,
}

/// A message arriving on a worker's inbound queue: either a normal remote
/// read result or a reconnaissance remote read result (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// `READ_RESULT` — satisfies a suspended normal transaction.
    ReadResult {
        /// String form of the target transaction id.
        destination_channel: String,
        /// This node's id (the recipient).
        destination_node: NodeId,
        /// Key/value pairs satisfying the pending read.
        data: Vec<KeyValue>,
    },
    /// `RECON_READ_RESULT` — satisfies a suspended recon probe.
    ReconReadResult {
        /// String form of the target transaction id.
        destination_channel: String,
        /// This node's id (the recipient).
        destination_node: NodeId,
        /// Key/value pairs satisfying the pending read.
        data: Vec<KeyValue>,
    },
    /// `RECON_INDEX_REPLY` — a designated responder's cumulative reply to
    /// the sequencer (spec §4.4, §6). Unlike the two variants above this
    /// one doesn't target a single in-flight transaction; it carries a
    /// batch of already-resolved transactions.
    ReconIndexReply(ReconIndexReply),
}

impl WorkerMessage {
    /// The transaction id this message targets, parsed from
    /// `destination_channel` (spec §6). `None` for `ReconIndexReply`,
    /// which targets the sequencer as a whole rather than one
    /// transaction's suspension point.
    pub fn target_txn_id(&self) -> Option<TxnId> {
        match self {
            WorkerMessage::ReadResult {
                destination_channel,
                ..
            }
            | WorkerMessage::ReconReadResult {
                destination_channel,
                ..
            } => destination_channel.parse().ok(),
            WorkerMessage::ReconIndexReply(_) => None,
        }
    }

    /// Key/value pairs carried by this message. Empty for
    /// `ReconIndexReply`, which carries serialised transactions instead.
    pub fn data(&self) -> &[KeyValue] {
        match self {
            WorkerMessage::ReadResult { data, .. } | WorkerMessage::ReconReadResult { data, .. } => {
                data
            }
            WorkerMessage::ReconIndexReply(_) => &[],
        }
    }

    /// True for `RECON_READ_RESULT` messages.
    pub fn is_recon(&self) -> bool {
        matches!(self, WorkerMessage::ReconReadResult { .. })
    }
}

/// Outbound `RECON_INDEX_REPLY` message (spec §6), addressed to the
/// sequencer. Carries serialised transactions whose read/write sets are
/// now fully resolved.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReconIndexReply {
    /// Always `"sequencer"` per spec §6.
    pub destination_channel: String,
    /// This node's id.
    pub destination_node: NodeId,
    /// Serialised transactions with resolved read/write sets.
    pub data: Vec<Vec<u8>>,
}

/// Result of `Application::execute` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecResult {
    /// The transaction ran to completion and may be committed.
    Success,
    /// The transaction requested a remote read; leave it suspended.
    Suspended,
    /// Unrecoverable application-level failure; do not retry.
    Failure,
}

/// Result of `Application::recon_execute` (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconResult {
    /// The transaction's read/write set is now fully populated.
    Success,
    /// The probe requested a remote read; keep the manager pending.
    Suspended,
    /// Any other outcome is a hard, silent failure (spec §7 `ReconUnresolvable`).
    Other,
}

/// Outcome of a storage commit attempt (spec §6 `Storage.commit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The transaction's writes are now durable/visible.
    Committed,
    /// The abort bit was observed set; nothing was applied.
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn designated_responder_is_first_reader() {
        let mut txn = Txn::new(1, "recon");
        assert_eq!(txn.designated_responder(), None);
        txn.readers = vec![7, 8, 9];
        assert_eq!(txn.designated_responder(), Some(7));
    }

    #[test]
    fn all_keys_chains_every_set() {
        let mut txn = Txn::new(1, "t");
        txn.read_set = vec!["a".into()];
        txn.write_set = vec!["b".into()];
        txn.read_write_set = vec!["c".into()];
        let keys: Vec<&Key> = txn.all_keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn worker_message_target_txn_id_parses_channel() {
        let msg = WorkerMessage::ReadResult {
            destination_channel: "42".to_string(),
            destination_node: 0,
            data: vec![],
        };
        assert_eq!(msg.target_txn_id(), Some(42));
        assert!(!msg.is_recon());
    }
}
