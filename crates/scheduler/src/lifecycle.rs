//! Thread lifecycle and CPU affinity (spec §2 C7, §4.7), grounded on the
//! `pthread_create`/`CPU_SET` calls in the original scheduler's
//! constructor, `examples/original_source/src/scheduler/deterministic_scheduler.cc`
//! (dispatch pinned to core 3, worker `i` pinned to core `i + 4`).
//!
//! Affinity is a performance hint, not a correctness requirement (spec
//! §9): a core assignment that can't be applied (fewer cores than
//! `num_threads + worker_core_base`, or no affinity support on this
//! platform) is logged and the thread keeps running unpinned.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use calvindb_core::config::SchedulerConfig;
use calvindb_core::{Application, Connection, Multiplexer, Storage};
use calvindb_queue::BatchSource;
use tracing::warn;

use crate::dispatch::Dispatch;
use crate::recon::{ReconEngine, ReconSource, SharedReconEngine};
use crate::throughput::ThroughputSampler;
use crate::worker::{Worker, WorkerShared};

/// Pin the calling thread to `core`, if affinity is available on this
/// machine and `core` names a real one.
fn pin_to_core(core: usize, role: &'static str) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!(role, core, "CPU affinity unavailable on this platform, running unpinned");
        return;
    };
    let Some(id) = ids.into_iter().find(|c| c.id == core) else {
        warn!(role, core, "requested core id not present, running unpinned");
        return;
    };
    if !core_affinity::set_for_current(id) {
        warn!(role, core, "failed to set CPU affinity, running unpinned");
    }
}

/// Owns the dispatch thread and every worker thread for one node's
/// scheduler instance. [`Self::shutdown`] (also run implicitly on drop)
/// signals every loop to stop and joins them (spec §4.7).
///
/// Joining the dispatch thread relies on its batch source eventually
/// returning `None` (spec §7 `BatchGap`: the dispatch loop blocks on the
/// channel with no timeout) — callers must close/drop their batch
/// producer before or during shutdown, or the join will block.
pub struct SchedulerHandle {
    shared: Arc<WorkerShared>,
    dispatch_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Spawn the dispatch thread and `config.num_threads` worker
    /// threads, pinning each to its conventional core when
    /// `config.dispatch_core`/`config.worker_core_base` are set.
    pub fn spawn(
        config: SchedulerConfig,
        application: Arc<dyn Application>,
        storage: Arc<dyn Storage>,
        multiplexer: Arc<dyn Multiplexer>,
        batch_source: Arc<dyn BatchSource>,
        recon_source: Arc<dyn ReconSource>,
    ) -> Self {
        let throughput = Arc::new(ThroughputSampler::new(
            calvindb_core::config::DEFAULT_THROUGHPUT_HISTORY,
        ));
        let recon_engine: SharedReconEngine = Arc::new(ReconEngine::new(config.this_node_id));
        let shared = Arc::new(WorkerShared::new(
            config.this_node_id,
            config.cold_cutoff,
            recon_engine,
            throughput,
        ));

        let dispatch_handle = Self::spawn_dispatch(
            Arc::clone(&shared),
            config.clone(),
            Arc::clone(&storage),
            batch_source,
        );

        // Every worker shares one connection (spec §4.5's per-worker
        // `thread_connection`, generalized here — see
        // `messaging::WORKER_CHANNEL` for why a single shared inbox is
        // the correct stand-in for the per-node routing table a real
        // messaging layer would maintain).
        let worker_connection: Arc<dyn Connection> =
            Arc::from(multiplexer.new_connection(crate::messaging::WORKER_CHANNEL));

        let mut worker_handles = Vec::with_capacity(config.num_threads);
        for i in 0..config.num_threads {
            worker_handles.push(Self::spawn_worker(
                i,
                Arc::clone(&shared),
                config.worker_core_base.map(|base| base + i),
                Arc::clone(&application),
                Arc::clone(&storage),
                Arc::clone(&worker_connection),
                Arc::clone(&recon_source),
            ));
        }

        SchedulerHandle {
            shared,
            dispatch_handle: Some(dispatch_handle),
            worker_handles,
        }
    }

    fn spawn_dispatch(
        shared: Arc<WorkerShared>,
        config: SchedulerConfig,
        storage: Arc<dyn Storage>,
        batch_source: Arc<dyn BatchSource>,
    ) -> JoinHandle<()> {
        let core = config.dispatch_core;
        std::thread::Builder::new()
            .name("calvindb-dispatch".to_string())
            .spawn(move || {
                if let Some(core) = core {
                    pin_to_core(core, "dispatch");
                }
                let mut dispatch = Dispatch::new(shared, config, storage);
                dispatch.run(batch_source.as_ref());
            })
            .expect("failed to spawn dispatch thread")
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_worker(
        id: usize,
        shared: Arc<WorkerShared>,
        core: Option<usize>,
        application: Arc<dyn Application>,
        storage: Arc<dyn Storage>,
        connection: Arc<dyn Connection>,
        recon_source: Arc<dyn ReconSource>,
    ) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name(format!("calvindb-worker-{id}"))
            .spawn(move || {
                if let Some(core) = core {
                    pin_to_core(core, "worker");
                }
                let mut worker = Worker::new(id, shared, connection, application, storage);
                worker.run(recon_source.as_ref());
            })
            .expect("failed to spawn worker thread")
    }

    /// This node's live transaction pipeline state (pending count,
    /// commit/abort throughput, active-transaction table), for
    /// observability or test assertions.
    pub fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    /// Signal shutdown (spec §4.7 `deconstructor_invoked`) and join
    /// every worker thread, then the dispatch thread. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.dispatch_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
