//! Scheduler configuration (spec §6 "Configuration inputs", §4.7 affinity).
//!
//! Loading these values from a file, environment, or CLI flags is out of
//! scope for this core (spec §1) — `SchedulerConfigBuilder` only assembles
//! an in-memory struct from values the embedding application already has,
//! in the style of the teacher's `DatabaseBuilder`.

/// Default slice size admitted from the current batch per dispatch tick
/// (spec §4.6 `BATCH_SLICE`).
pub const DEFAULT_MAX_BATCH_SIZE: usize = 200;

/// Default strict upper bound on transactions admitted but not yet
/// committed (spec §4.6 `MAX_PENDING`).
pub const DEFAULT_MAX_PENDING: usize = 2000;

/// Dispatch thread's pinned core, per the original scheduler
/// (`CPU_SET(3, ...)` in `deterministic_scheduler.cc`).
pub const DEFAULT_DISPATCH_CORE: usize = 3;

/// First worker's pinned core; worker `i` pins to `WORKER_CORE_BASE + i`
/// (`CPU_SET(i + 4, ...)` in the original scheduler).
pub const DEFAULT_WORKER_CORE_BASE: usize = 4;

/// Ring buffer capacity for per-second throughput/abort samples.
pub const DEFAULT_THROUGHPUT_HISTORY: usize = 2000;

/// Latency sample ring buffer size (`LATENCY_SIZE` in the original).
pub const LATENCY_SAMPLE_SIZE: usize = 2000;

/// Sample one in every `SAMPLE_RATE` transactions for latency tracking
/// (`seed % SAMPLE_RATE == 0`), matching the original scheduler.
pub const LATENCY_SAMPLE_RATE: u64 = 1000;

/// Configuration for one node's scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads (spec §6 `num_threads`).
    pub num_threads: usize,
    /// Max transactions admitted from a batch per dispatch tick (spec §6
    /// `max_batch_size`).
    pub max_batch_size: usize,
    /// Strict upper bound on in-flight (admitted, uncommitted)
    /// transactions (spec §6 `max_pending`).
    pub max_pending: usize,
    /// Keys with a numeric value above this threshold are eligible for
    /// `Storage::unfetch` after commit (spec §6 `cold_cutoff`).
    pub cold_cutoff: i64,
    /// CPU core the dispatch thread pins to. `None` disables pinning.
    pub dispatch_core: Option<usize>,
    /// CPU core worker 0 pins to; worker `i` pins to `worker_core_base +
    /// i`. `None` disables pinning.
    pub worker_core_base: Option<usize>,
    /// This node's id, used to address outbound messages.
    pub this_node_id: crate::types::NodeId,
}

impl SchedulerConfig {
    /// Start building a config for `num_threads` workers on node
    /// `this_node_id`, with spec-default admission parameters and
    /// affinity pinned starting at the conventional cores.
    pub fn builder(num_threads: usize, this_node_id: crate::types::NodeId) -> SchedulerConfigBuilder {
        SchedulerConfigBuilder {
            config: SchedulerConfig {
                num_threads,
                max_batch_size: DEFAULT_MAX_BATCH_SIZE,
                max_pending: DEFAULT_MAX_PENDING,
                cold_cutoff: i64::MAX,
                dispatch_core: Some(DEFAULT_DISPATCH_CORE),
                worker_core_base: Some(DEFAULT_WORKER_CORE_BASE),
                this_node_id,
            },
        }
    }
}

/// Builder for [`SchedulerConfig`].
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    /// Override the per-tick batch admission slice.
    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.config.max_batch_size = n;
        self
    }

    /// Override the strict in-flight transaction cap.
    pub fn max_pending(mut self, n: usize) -> Self {
        self.config.max_pending = n;
        self
    }

    /// Override the cold-key eviction threshold.
    pub fn cold_cutoff(mut self, n: i64) -> Self {
        self.config.cold_cutoff = n;
        self
    }

    /// Disable CPU affinity pinning entirely (useful in tests and on
    /// machines with fewer cores than the pinning scheme assumes).
    pub fn without_affinity(mut self) -> Self {
        self.config.dispatch_core = None;
        self.config.worker_core_base = None;
        self
    }

    /// Finish building.
    pub fn build(self) -> SchedulerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_spec_defaults() {
        let cfg = SchedulerConfig::builder(4, 0).build();
        assert_eq!(cfg.num_threads, 4);
        assert_eq!(cfg.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(cfg.max_pending, DEFAULT_MAX_PENDING);
        assert_eq!(cfg.dispatch_core, Some(DEFAULT_DISPATCH_CORE));
    }

    #[test]
    fn without_affinity_clears_core_pins() {
        let cfg = SchedulerConfig::builder(2, 0).without_affinity().build();
        assert_eq!(cfg.dispatch_core, None);
        assert_eq!(cfg.worker_core_base, None);
    }

    #[test]
    fn overrides_take_effect() {
        let cfg = SchedulerConfig::builder(2, 1)
            .max_batch_size(50)
            .max_pending(100)
            .cold_cutoff(1000)
            .build();
        assert_eq!(cfg.max_batch_size, 50);
        assert_eq!(cfg.max_pending, 100);
        assert_eq!(cfg.cold_cutoff, 1000);
        assert_eq!(cfg.this_node_id, 1);
    }
}
