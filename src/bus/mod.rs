//! Topic-addressed publish/subscribe transport.
//!
//! Agents only see the [`MessageBus`] trait. Two implementations exist:
//!
//! - [`MemoryBus`]: in-process broker used by tests, the demo, and as the
//!   routing core of the gRPC broker
//! - [`RemoteBus`](crate::grpc::RemoteBus): client for a broker reached over gRPC
//!
//! Delivery is at-most-once. A subscriber whose queue is full or closed
//! silently misses the message; nothing is acknowledged or replayed.

pub mod memory;

pub use memory::MemoryBus;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CnpError, Result};
use crate::protocol::WireMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Inbound message stream of one subscriber.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<BusMessage>) -> Self {
        Self { rx }
    }

    /// Next message, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to every topic matching any of `filters`. Messages published
    /// after this returns are delivered; earlier ones are not.
    async fn subscribe(&self, filters: Vec<String>) -> Result<Subscription>;
}

pub type SharedBus = Arc<dyn MessageBus>;

/// Encode a protocol message and publish it.
pub async fn publish_message<M: WireMessage>(
    bus: &dyn MessageBus,
    topic: &str,
    message: &M,
) -> Result<()> {
    let payload = message.encode()?;
    bus.publish(topic, payload).await
}

/// Topics that are published to must be concrete.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(CnpError::Config(format!(
            "'{}' is not a publishable topic",
            topic
        )));
    }
    Ok(())
}

/// Wildcards must occupy a whole level, and `#` may only be the last level.
pub fn validate_filter(filter: &str) -> Result<()> {
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len().saturating_sub(1);
    for (i, level) in levels.iter().enumerate() {
        let valid = match *level {
            "#" => i == last,
            "+" => true,
            other => !other.contains(['+', '#']),
        };
        if !valid || filter.is_empty() {
            return Err(CnpError::Config(format!(
                "'{}' is not a valid topic filter",
                filter
            )));
        }
    }
    Ok(())
}
