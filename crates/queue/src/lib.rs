//! Lock-free-adjacent building blocks shared by the dispatch and worker
//! loops: the bounded FIFO queue (C1), the concurrent keyed map (C2),
//! and the out-of-order batch cache (C3) (spec §2).

pub mod atomic_queue;
pub mod batch_cache;
pub mod concurrent_map;

pub use atomic_queue::AtomicQueue;
pub use batch_cache::{BatchCache, BatchSource};
pub use concurrent_map::ConcurrentMap;
