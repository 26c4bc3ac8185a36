use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::bus::{validate_filter, validate_topic, BusMessage, MessageBus, Subscription};
use crate::error::Result;
use crate::protocol::topic_matches;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    filters: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
}

impl Subscriber {
    fn wants(&self, topic: &str) -> bool {
        self.filters.iter().any(|f| topic_matches(f, topic))
    }
}

/// In-process broker with per-subscriber bounded queues.
///
/// Cloning yields another handle to the same broker.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
    capacity: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            capacity: capacity.max(1),
        }
    }

    /// Fan a message out to every matching subscriber. Returns how many
    /// queues accepted it.
    pub async fn deliver(&self, topic: &str, payload: Vec<u8>) -> Result<usize> {
        validate_topic(topic)?;

        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter().filter(|s| s.wants(topic)) {
            match subscriber
                .tx
                .try_send(BusMessage::new(topic, payload.clone()))
            {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscriber = subscriber.id,
                        topic,
                        "Subscriber queue full, message dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        tracing::trace!(topic, delivered, "Message published");
        Ok(delivered)
    }

    pub async fn subscriber_count(&self) -> usize {
        let subscribers = self.subscribers.lock().await;
        subscribers.iter().filter(|s| !s.tx.is_closed()).count()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.deliver(topic, payload).await.map(|_| ())
    }

    async fn subscribe(&self, filters: Vec<String>) -> Result<Subscription> {
        for filter in &filters {
            validate_filter(filter)?;
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(subscriber = id, filters = ?filters, "Subscription opened");

        self.subscribers
            .lock()
            .await
            .push(Subscriber { id, filters, tx });

        Ok(Subscription::new(rx))
    }
}
