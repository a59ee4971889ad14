//! # calvindb
//!
//! A deterministic transaction scheduler core, in the Calvin lineage:
//! transactions arrive pre-ordered into globally agreed batches, and this
//! crate admits, executes (speculatively, with suspend-on-remote-read and
//! cascading abort), reconnaissance-probes, and commits them in an order
//! every replica reaches independently — without a distributed commit
//! protocol on the execution path.
//!
//! # Quick Start
//!
//! ```no_run
//! use calvindb::{Scheduler, SchedulerConfig};
//! use calvindb_scheduler::{channel_batch_source, channel_recon_source, ChannelMultiplexer};
//! use calvindb_storage::{CounterApp, InMemoryStorage};
//! use std::sync::Arc;
//!
//! let config = SchedulerConfig::builder(4, 0).without_affinity().build();
//! let (batch_producer, batch_source) = channel_batch_source();
//! let (_recon_producer, recon_source) = channel_recon_source();
//!
//! let scheduler = Scheduler::spawn(
//!     config,
//!     Arc::new(CounterApp),
//!     Arc::new(InMemoryStorage::new()),
//!     Arc::new(ChannelMultiplexer::new()),
//!     Arc::new(batch_source),
//!     Arc::new(recon_source),
//! );
//!
//! // feed batches via batch_producer.send(..), then:
//! drop(batch_producer);
//! ```
//!
//! # Architecture
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | `calvindb-core` | wire types (`Txn`, `Batch`, ...), the `Storage`/`Application`/`Connection`/`Multiplexer` traits, config, errors, abort signalling |
//! | `calvindb-queue` | `AtomicQueue`, `ConcurrentMap`, `BatchCache` concurrency primitives |
//! | `calvindb-storage` | `StorageManager`/`ReconStorageManager`, plus a reference `InMemoryStorage` |
//! | `calvindb-scheduler` | the dispatch loop, worker pool, reconnaissance engine, and lifecycle supervisor |
//!
//! [`Scheduler`] wires all four into the running pipeline. Internal crates
//! are re-exported so callers don't need to depend on them directly.

pub use calvindb_core::config::{SchedulerConfig, SchedulerConfigBuilder};
pub use calvindb_core::*;
pub use calvindb_queue::*;
pub use calvindb_scheduler::*;
pub use calvindb_storage::*;

/// Thin facade over [`calvindb_scheduler::SchedulerHandle`]: the crate's
/// single public entry point for standing up a running scheduler
/// instance (spec §2 "wires the above into a `Scheduler` facade").
pub struct Scheduler {
    handle: SchedulerHandle,
}

impl Scheduler {
    /// Spawn the dispatch thread and the configured number of worker
    /// threads, wiring them against the given application, storage, and
    /// messaging collaborators. See [`SchedulerHandle::spawn`] for the
    /// exact thread/affinity behavior.
    pub fn spawn(
        config: SchedulerConfig,
        application: std::sync::Arc<dyn calvindb_core::Application>,
        storage: std::sync::Arc<dyn calvindb_core::Storage>,
        multiplexer: std::sync::Arc<dyn calvindb_core::Multiplexer>,
        batch_source: std::sync::Arc<dyn calvindb_queue::BatchSource>,
        recon_source: std::sync::Arc<dyn calvindb_scheduler::ReconSource>,
    ) -> Self {
        Scheduler {
            handle: SchedulerHandle::spawn(
                config,
                application,
                storage,
                multiplexer,
                batch_source,
                recon_source,
            ),
        }
    }

    /// Live pipeline state: pending-transaction count and commit/abort
    /// throughput, for observability or test assertions.
    pub fn shared(&self) -> &std::sync::Arc<WorkerShared> {
        self.handle.shared()
    }

    /// Signal shutdown and join every thread. Also run implicitly on
    /// drop.
    pub fn shutdown(&mut self) {
        self.handle.shutdown();
    }
}
