//! The pub/sub registry: channel name to topic, each topic drained by a
//! dedicated fan-out worker.
//!
//! Grounded in the teacher's per-consumer fan-out shape (`local_fanout.rs`'s
//! `serve_consumer`, `workers::client_pool`'s broadcast-to-all-then-drop-
//! failures loop): one task per topic owns that topic's subscriber list
//! outright, so list mutation is never contended across tasks. Subscribe and
//! unsubscribe requests are themselves messages into that task's own loop,
//! per the design note in spec.md §9 ("coordinate via a per-topic lock or by
//! routing all mutations through the fan-out worker's message loop" — this
//! implementation takes the latter).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use resp_protocol::Frame;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

/// Identifies a connection's outbound sink across topics.
pub type SinkId = u64;

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh identity for a newly accepted connection.
pub fn next_sink_id() -> SinkId {
    NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed)
}

/// The write side of a subscriber connection, as seen by pub/sub. Wraps the
/// connection's outbound queue (see the connection handler: replies and
/// fan-out messages both funnel through this same per-connection channel so
/// writes never interleave on the socket).
#[derive(Clone)]
pub struct Sink {
    pub id: SinkId,
    pub tx: mpsc::Sender<Frame>,
}

impl Sink {
    pub fn new(id: SinkId, tx: mpsc::Sender<Frame>) -> Self {
        Sink { id, tx }
    }
}

impl PartialEq for Sink {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

enum ControlOp {
    Subscribe(Sink),
    Unsubscribe(Sink),
}

/// A cheaply-cloneable reference to a live topic's worker.
#[derive(Clone)]
struct TopicHandle {
    control_tx: mpsc::UnboundedSender<ControlOp>,
    queue_tx: mpsc::Sender<Frame>,
    subscriber_count: Arc<AtomicUsize>,
}

struct TopicWorker {
    channel: Vec<u8>,
    subscribers: Vec<Sink>,
    subscriber_count: Arc<AtomicUsize>,
    counts: Arc<Mutex<HashMap<SinkId, usize>>>,
    control_rx: mpsc::UnboundedReceiver<ControlOp>,
    queue_rx: mpsc::Receiver<Frame>,
}

impl TopicWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                op = self.control_rx.recv() => match op {
                    Some(ControlOp::Subscribe(sink)) => self.handle_subscribe(sink).await,
                    Some(ControlOp::Unsubscribe(sink)) => self.handle_unsubscribe(sink).await,
                    None => break,
                },
                msg = self.queue_rx.recv() => match msg {
                    Some(frame) => self.deliver(frame).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_subscribe(&mut self, sink: Sink) {
        if self.subscribers.iter().any(|s| s.id == sink.id) {
            return;
        }
        self.subscribers.push(sink.clone());
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        let count = {
            let mut counts = self.counts.lock().await;
            let entry = counts.entry(sink.id).or_insert(0);
            *entry += 1;
            *entry
        };
        self.send_control_message("subscribe", &sink, count).await;
    }

    async fn handle_unsubscribe(&mut self, sink: Sink) {
        let was_subscribed = if let Some(pos) = self.subscribers.iter().position(|s| s.id == sink.id) {
            self.subscribers.remove(pos);
            self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
            true
        } else {
            false
        };
        let count = {
            let mut counts = self.counts.lock().await;
            if was_subscribed {
                let entry = counts.entry(sink.id).or_insert(0);
                *entry = entry.saturating_sub(1);
                *entry
            } else {
                counts.get(&sink.id).copied().unwrap_or(0)
            }
        };
        self.send_control_message("unsubscribe", &sink, count).await;
    }

    async fn send_control_message(&self, kind: &str, sink: &Sink, count: usize) {
        let frame = Frame::Array(vec![
            Frame::Bulk(kind.as_bytes().to_vec()),
            Frame::Bulk(self.channel.clone()),
            Frame::Integer(count as i64),
        ]);
        let _ = sink.tx.send(frame).await;
    }

    /// Delivers one published message to every current subscriber, in
    /// reverse index order, dropping any sink whose write fails with a
    /// closed-connection error and retaining (but logging) any other error.
    async fn deliver(&mut self, frame: Frame) {
        let mut dead = Vec::new();
        for (idx, sink) in self.subscribers.iter().enumerate().rev() {
            if let Err(err) = sink.tx.try_send(frame.clone()) {
                match err {
                    mpsc::error::TrySendError::Closed(_) => dead.push(idx),
                    mpsc::error::TrySendError::Full(_) => {
                        warn!(
                            channel = %String::from_utf8_lossy(&self.channel),
                            sink = sink.id,
                            "subscriber outbound queue full, message dropped for this sink"
                        );
                    }
                }
            }
        }
        for idx in dead {
            let sink = self.subscribers.remove(idx);
            self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
            debug!(sink = sink.id, "removed closed subscriber from topic");
        }
    }
}

/// Bounded capacity of each topic's pending-message queue. `publish` blocks
/// once a topic's queue is full rather than dropping messages.
const DEFAULT_QUEUE_CAPACITY: usize = 10;

pub struct PubSubRegistry {
    topics: RwLock<HashMap<Vec<u8>, TopicHandle>>,
    counts: Arc<Mutex<HashMap<SinkId, usize>>>,
    queue_capacity: usize,
}

impl Default for PubSubRegistry {
    fn default() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl PubSubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        PubSubRegistry {
            topics: RwLock::new(HashMap::new()),
            counts: Arc::new(Mutex::new(HashMap::new())),
            queue_capacity,
        }
    }

    async fn get_or_create_topic(&self, channel: &[u8]) -> TopicHandle {
        {
            let topics = self.topics.read().await;
            if let Some(handle) = topics.get(channel) {
                return handle.clone();
            }
        }
        let mut topics = self.topics.write().await;
        if let Some(handle) = topics.get(channel) {
            return handle.clone();
        }
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity);
        let subscriber_count = Arc::new(AtomicUsize::new(0));
        let worker = TopicWorker {
            channel: channel.to_vec(),
            subscribers: Vec::new(),
            subscriber_count: subscriber_count.clone(),
            counts: self.counts.clone(),
            control_rx,
            queue_rx,
        };
        tokio::spawn(worker.run());
        let handle = TopicHandle {
            control_tx,
            queue_tx,
            subscriber_count,
        };
        topics.insert(channel.to_vec(), handle.clone());
        handle
    }

    /// Registers `sink` against `channel`, creating the topic (and its
    /// fan-out worker) on first use. The `subscribe` control message is
    /// emitted asynchronously by that worker.
    pub async fn subscribe(&self, channel: &[u8], sink: Sink) {
        let handle = self.get_or_create_topic(channel).await;
        let _ = handle.control_tx.send(ControlOp::Subscribe(sink));
    }

    /// Symmetric to `subscribe`. If no topic was ever created for `channel`
    /// (the connection never subscribed to it), the control message is
    /// still emitted, echoing the connection's current — unchanged —
    /// subscription count, matching the reply every UNSUBSCRIBE call is
    /// owed per-channel.
    pub async fn unsubscribe(&self, channel: &[u8], sink: Sink) {
        let existing = {
            let topics = self.topics.read().await;
            topics.get(channel).cloned()
        };
        match existing {
            Some(handle) => {
                let _ = handle.control_tx.send(ControlOp::Unsubscribe(sink));
            }
            None => {
                let count = {
                    let counts = self.counts.lock().await;
                    counts.get(&sink.id).copied().unwrap_or(0)
                };
                let frame = Frame::Array(vec![
                    Frame::Bulk(b"unsubscribe".to_vec()),
                    Frame::Bulk(channel.to_vec()),
                    Frame::Integer(count as i64),
                ]);
                let _ = sink.tx.send(frame).await;
            }
        }
    }

    /// Enqueues a message frame on `channel`'s topic and returns the
    /// subscriber-count snapshot at enqueue time — not a delivery
    /// acknowledgment. Blocks when the topic's queue is full; never holds
    /// the topic-table lock while blocking.
    pub async fn publish(&self, channel: &[u8], payload: Vec<u8>) -> usize {
        let handle = {
            let topics = self.topics.read().await;
            topics.get(channel).cloned()
        };
        let Some(handle) = handle else {
            return 0;
        };
        let frame = Frame::Array(vec![
            Frame::Bulk(b"message".to_vec()),
            Frame::Bulk(channel.to_vec()),
            Frame::Bulk(payload),
        ]);
        if handle.queue_tx.send(frame).await.is_err() {
            return 0;
        }
        handle.subscriber_count.load(Ordering::SeqCst)
    }
}
