//! Minimal end-to-end demonstration: spins up a [`calvindb::Scheduler`]
//! against the in-memory reference storage and a trivial counter
//! application, feeds it one batch of increment transactions over the
//! in-process channel test doubles, waits for them to drain, and prints
//! the resulting counter value. Not a production sequencer/network
//! stack — see `calvindb-storage`/`calvindb-scheduler`'s doc comments
//! for what stands in for those external collaborators here.

use calvindb::{
    channel_batch_source, channel_recon_source, Batch, ChannelMultiplexer, CounterApp,
    InMemoryStorage, Scheduler, SchedulerConfig, Txn,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() {
    tracing_subscriber::fmt::init();

    let config = SchedulerConfig::builder(4, 0).without_affinity().build();
    let (batch_producer, batch_source) = channel_batch_source();
    let (_recon_producer, recon_source) = channel_recon_source();
    let storage = Arc::new(InMemoryStorage::new());

    let mut scheduler = Scheduler::spawn(
        config,
        Arc::new(CounterApp),
        Arc::clone(&storage) as Arc<dyn calvindb::Storage>,
        Arc::new(ChannelMultiplexer::new()),
        Arc::new(batch_source),
        Arc::new(recon_source),
    );

    let data = (1..=100u64)
        .map(|id| {
            let mut txn = Txn::new(id, "incr");
            txn.read_write_set = vec!["counter".to_string()];
            txn.encode().expect("txn encodes")
        })
        .collect();
    batch_producer.send(Batch {
        batch_number: 0,
        data,
    });

    let deadline = Instant::now() + Duration::from_secs(5);
    while scheduler.shared().pending_len() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    println!(
        "committed 100 increments, final counter = {:?}",
        storage.committed(&"counter".to_string())
    );

    drop(batch_producer);
    scheduler.shutdown();
}
