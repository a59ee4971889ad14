//! In-process test double for the messaging layer (spec §1 Non-goals:
//! "the messaging layer providing typed channels between named
//! endpoints" is an external collaborator). `ChannelMultiplexer` and
//! `ChannelConnection` satisfy `calvindb_core::{Multiplexer, Connection}`
//! with ordinary MPSC channels keyed by channel name, so the worker pool
//! and dispatch loop can be exercised end to end without a real network
//! transport.

use calvindb_core::{Batch, Connection, Multiplexer, NodeId, ReconBatch, Result, WorkerMessage};
use calvindb_queue::BatchSource;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use crate::recon::ReconSource;

/// The channel name every worker's connection is opened under.
///
/// Spec §6 addresses inbound `READ_RESULT`/`RECON_READ_RESULT` messages
/// by `destination_channel = <txn_id>`, not by a specific worker's
/// channel name — the real messaging layer's per-node routing table is
/// what maps a txn id back to whichever worker currently holds it in
/// `active_txns`, and that table is outside this core's scope (spec §1
/// Non-goals). Rather than reimplement that table, every worker opens
/// the *same* connection on this one channel (spec §4.5 "Suspension
/// semantics": a suspended transaction is not pinned to its original
/// worker), so whichever worker polls next can see the message and
/// `active_txns`'s atomic `erase` ensures only one of them actually acts
/// on it.
pub const WORKER_CHANNEL: &str = "workers";

/// A named set of in-process channels. Every `new_connection("x")` call
/// attaches a fresh receiver to the same sender, so multiple readers on
/// one channel name fan out round-robin the way the real multiplexer's
/// named endpoints would if several threads opened the same connection
/// (not a scenario this core actually does, but matching the trait's
/// generality costs nothing).
#[derive(Clone)]
pub struct ChannelMultiplexer {
    senders: Arc<Mutex<HashMap<String, Sender<(NodeId, WorkerMessage)>>>>,
    receivers: Arc<Mutex<HashMap<String, Receiver<(NodeId, WorkerMessage)>>>>,
}

impl Default for ChannelMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMultiplexer {
    /// Create an empty multiplexer.
    pub fn new() -> Self {
        ChannelMultiplexer {
            senders: Arc::new(Mutex::new(HashMap::new())),
            receivers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Send `message` to whichever connection is named `channel_name`,
    /// creating the channel (with no reader yet attached) if necessary.
    pub fn deliver(&self, channel_name: &str, from: NodeId, message: WorkerMessage) {
        self.ensure_channel(channel_name);
        if let Some(tx) = self.senders.lock().get(channel_name) {
            // A connection that was never opened (e.g. "sequencer" in a
            // single-node test) has no reader; dropping the send is fine,
            // it mirrors an unconsumed outbound message.
            let _ = tx.send((from, message));
        }
    }

    fn ensure_channel(&self, channel_name: &str) {
        let mut senders = self.senders.lock();
        if senders.contains_key(channel_name) {
            return;
        }
        let (tx, rx) = std::sync::mpsc::channel();
        senders.insert(channel_name.to_string(), tx);
        self.receivers.lock().insert(channel_name.to_string(), rx);
    }
}

impl Multiplexer for ChannelMultiplexer {
    fn new_connection(&self, channel_name: &str) -> Box<dyn Connection> {
        self.ensure_channel(channel_name);
        let rx = self
            .receivers
            .lock()
            .remove(channel_name)
            .expect("channel just ensured to exist");
        Box::new(ChannelConnection {
            name: channel_name.to_string(),
            rx: Mutex::new(rx),
            hub: self.clone(),
        })
    }
}

/// A connection bound to one named channel. Reads come from this
/// channel's own receiver; writes are routed through the shared hub to
/// whichever channel name the destination message targets.
struct ChannelConnection {
    name: String,
    rx: Mutex<Receiver<(NodeId, WorkerMessage)>>,
    hub: ChannelMultiplexer,
}

impl Connection for ChannelConnection {
    fn try_receive(&self) -> Option<WorkerMessage> {
        self.rx.lock().try_recv().ok().map(|(_, msg)| msg)
    }

    fn send(&self, _destination: NodeId, message: WorkerMessage) -> Result<()> {
        // `ReadResult`/`ReconReadResult.destination_channel` names a
        // txn id (spec §6), not a channel this in-process multiplexer
        // has ever registered — every worker shares `WORKER_CHANNEL`
        // instead (see its doc comment) and filters by txn id itself.
        // `ReconIndexReply` is the one message type genuinely addressed
        // to a distinct named endpoint ("sequencer"), so that one still
        // routes by its own `destination_channel`.
        let target = match &message {
            WorkerMessage::ReadResult { .. } | WorkerMessage::ReconReadResult { .. } => {
                WORKER_CHANNEL.to_string()
            }
            WorkerMessage::ReconIndexReply(reply) => reply.destination_channel.clone(),
        };
        self.hub.deliver(&target, 0, message);
        Ok(())
    }
}

impl ChannelConnection {
    /// This connection's channel name, for diagnostics.
    #[allow(dead_code)]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// In-process test double for the sequencer's batch channel (spec §6
/// "Batch channel input"). The dispatch loop's `BatchCache` (spec §4.3)
/// already tolerates out-of-order delivery, so this just needs to be a
/// blocking MPSC queue that reports closure as `None` — exactly the
/// contract [`BatchSource`] documents.
pub struct ChannelBatchSource {
    rx: Receiver<Batch>,
}

impl BatchSource for ChannelBatchSource {
    fn recv(&self) -> Option<Batch> {
        self.rx.recv().ok()
    }
}

/// Producer half of a [`ChannelBatchSource`] pair, handed to whatever
/// stands in for the sequencer in a test or demo.
pub struct BatchProducer {
    tx: Sender<Batch>,
}

impl BatchProducer {
    /// Ship `batch` to the paired [`ChannelBatchSource`].
    pub fn send(&self, batch: Batch) {
        let _ = self.tx.send(batch);
    }
}

/// Build a connected batch-channel pair: a producer the test/demo drives
/// and a [`ChannelBatchSource`] the dispatch loop polls.
pub fn channel_batch_source() -> (BatchProducer, ChannelBatchSource) {
    let (tx, rx) = std::sync::mpsc::channel();
    (BatchProducer { tx }, ChannelBatchSource { rx })
}

/// In-process test double for the sequencer's recon channel (spec §6
/// "Recon channel input"). Unlike the batch channel this one is polled
/// non-blockingly by every worker (spec §4.5 step 4), so `try_recv`
/// never waits.
pub struct ChannelReconSource {
    rx: Mutex<Receiver<ReconBatch>>,
}

impl ReconSource for ChannelReconSource {
    fn try_recv(&self) -> Option<ReconBatch> {
        self.rx.lock().try_recv().ok()
    }
}

/// Producer half of a [`ChannelReconSource`] pair.
pub struct ReconBatchProducer {
    tx: Sender<ReconBatch>,
}

impl ReconBatchProducer {
    /// Ship `batch` to the paired [`ChannelReconSource`].
    pub fn send(&self, batch: ReconBatch) {
        let _ = self.tx.send(batch);
    }
}

/// Build a connected recon-channel pair.
pub fn channel_recon_source() -> (ReconBatchProducer, ChannelReconSource) {
    let (tx, rx) = std::sync::mpsc::channel();
    (ReconBatchProducer { tx }, ChannelReconSource { rx: Mutex::new(rx) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use calvindb_core::KeyValue;

    #[test]
    fn message_sent_to_channel_is_received_on_that_connection() {
        let hub = ChannelMultiplexer::new();
        let conn = hub.new_connection("42");
        hub.deliver(
            "42",
            0,
            WorkerMessage::ReadResult {
                destination_channel: "42".to_string(),
                destination_node: 0,
                data: vec![KeyValue {
                    key: "k".to_string(),
                    value: b"v".to_vec(),
                }],
            },
        );
        let msg = conn.try_receive().expect("message should have arrived");
        assert_eq!(msg.target_txn_id(), Some(42));
    }

    #[test]
    fn empty_channel_returns_none() {
        let hub = ChannelMultiplexer::new();
        let conn = hub.new_connection("1");
        assert!(conn.try_receive().is_none());
    }

    #[test]
    fn recon_index_reply_routes_by_its_own_destination_channel() {
        let hub = ChannelMultiplexer::new();
        let sequencer = hub.new_connection("sequencer");
        let worker_conn = hub.new_connection(WORKER_CHANNEL);

        worker_conn
            .send(
                0,
                WorkerMessage::ReconIndexReply(calvindb_core::ReconIndexReply {
                    destination_channel: "sequencer".to_string(),
                    destination_node: 0,
                    data: vec![],
                }),
            )
            .unwrap();

        assert!(sequencer.try_receive().is_some());
    }

    #[test]
    fn read_result_always_routes_to_the_shared_worker_channel() {
        // Even though `destination_channel` names a txn id that was
        // never registered as a channel, `send` must deliver it onto
        // `WORKER_CHANNEL` — that's where every worker actually polls.
        let hub = ChannelMultiplexer::new();
        let workers = hub.new_connection(WORKER_CHANNEL);

        hub.new_connection("99")
            .send(
                0,
                WorkerMessage::ReadResult {
                    destination_channel: "99".to_string(),
                    destination_node: 0,
                    data: vec![],
                },
            )
            .unwrap();

        let msg = workers.try_receive().expect("should have landed on the shared worker channel");
        assert_eq!(msg.target_txn_id(), Some(99));
    }

    #[test]
    fn batch_channel_delivers_in_send_order() {
        let (producer, source) = channel_batch_source();
        producer.send(Batch { batch_number: 0, data: vec![] });
        producer.send(Batch { batch_number: 1, data: vec![] });
        assert_eq!(source.recv().unwrap().batch_number, 0);
        assert_eq!(source.recv().unwrap().batch_number, 1);
    }

    #[test]
    fn batch_channel_reports_closure_as_none() {
        let (producer, source) = channel_batch_source();
        drop(producer);
        assert!(source.recv().is_none());
    }

    #[test]
    fn recon_channel_try_recv_never_blocks_on_empty() {
        let (_producer, source) = channel_recon_source();
        assert!(source.try_recv().is_none());
    }

    #[test]
    fn recon_channel_delivers_sent_batch() {
        let (producer, source) = channel_recon_source();
        producer.send(ReconBatch { data: vec![b"x".to_vec()] });
        let batch = source.try_recv().expect("batch should have arrived");
        assert_eq!(batch.data, vec![b"x".to_vec()]);
    }
}
