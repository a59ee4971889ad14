//! Core types, error taxonomy, and collaborator traits for the
//! deterministic transaction scheduler (spec §1-§3, §6-§7).
//!
//! This crate has no internal workspace dependencies — `calvindb-queue`,
//! `calvindb-storage`, and `calvindb-scheduler` all build on top of it.

pub mod abort;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use abort::{AbortSignal, PendingReadEntry, ReadFromEntry};
pub use config::SchedulerConfig;
pub use error::{Error, Result};
pub use traits::{Application, Connection, Multiplexer, ReadContext, Storage};
pub use types::{
    Batch, CommitOutcome, ExecResult, Key, KeyValue, NodeId, ReconBatch, ReconIndexReply,
    ReconResult, Txn, TxnId, TxnStatus, Value, WorkerMessage,
};
