//! Worker pool, dispatch loop, and reconnaissance engine (spec §2 C4-C7).
//!
//! This crate wires `calvindb-core`'s types and `calvindb-storage`'s
//! storage engine into the running scheduler: a dispatch thread that
//! admits globally-ordered batches under a pending-transaction cap, a
//! pool of worker threads that execute/suspend/abort individual
//! transactions, and a reconnaissance engine that resolves dependent
//! transactions' read/write sets ahead of their main pass. `messaging`
//! provides in-process channel-backed test doubles for the externally
//! owned messaging layer (spec §1 Non-goals).

pub mod dispatch;
pub mod lifecycle;
pub mod messaging;
pub mod recon;
pub mod throughput;
pub mod time;
pub mod worker;

pub use dispatch::Dispatch;
pub use lifecycle::SchedulerHandle;
pub use messaging::{
    channel_batch_source, channel_recon_source, BatchProducer, ChannelBatchSource,
    ChannelMultiplexer, ChannelReconSource, ReconBatchProducer,
};
pub use recon::{ReconEngine, ReconSource, SharedReconEngine};
pub use throughput::{ThroughputSample, ThroughputSampler};
pub use worker::{Worker, WorkerShared};
