//! Click bus: the partitioned, at-least-once append-only stream that sits
//! between the producer and the aggregation consumer.
//!
//! The wire contract (produce with partition key and headers, consume with
//! manual commit) is grounded on `scheduling::queue::JobQueue`'s
//! Redis-backed primitives, but no real broker client lives in this
//! dependency tree: [`InMemoryClickBus`] implements the same contract over
//! an in-process channel so the rest of the crate never depends on which
//! broker a deployment actually wires in.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

#[derive(Error, Debug)]
pub enum BusError {
    #[error("bus is disconnected")]
    Disconnected,
}

/// Headers carried alongside every message, per the wire contract.
#[derive(Debug, Clone)]
pub struct MessageHeaders {
    pub event_type: String,
    pub version: String,
    pub event_id: String,
}

/// A produced or consumed bus message.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub partition_key: String,
    pub payload: Vec<u8>,
    pub headers: MessageHeaders,
}

/// Produce/consume contract for the click stream. A real deployment backs
/// this with Kafka, Redpanda, or similar; tests and the reference consumer
/// use [`InMemoryClickBus`].
#[async_trait]
pub trait ClickBus: Send + Sync {
    async fn produce(&self, message: BusMessage) -> Result<(), BusError>;

    /// Waits up to `timeout` for the next message in consumer-group order.
    /// Returns `None` on timeout, matching a poll-with-no-data outcome.
    async fn poll(&self, timeout: Duration) -> Option<BusMessage>;
}

/// Single-process bus: one unbounded channel feeding one logical consumer
/// group. Since there is only ever one reader, ordering within a partition
/// key falls out of the channel's own FIFO order for free.
pub struct InMemoryClickBus {
    sender: mpsc::UnboundedSender<BusMessage>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<BusMessage>>,
}

impl InMemoryClickBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: AsyncMutex::new(receiver),
        }
    }
}

impl Default for InMemoryClickBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClickBus for InMemoryClickBus {
    async fn produce(&self, message: BusMessage) -> Result<(), BusError> {
        self.sender.send(message).map_err(|_| BusError::Disconnected)
    }

    async fn poll(&self, timeout: Duration) -> Option<BusMessage> {
        let mut receiver = self.receiver.lock().await;
        tokio::time::timeout(timeout, receiver.recv()).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_for_the_same_key_preserve_send_order() {
        let bus = InMemoryClickBus::new();
        for i in 0..5 {
            bus.produce(BusMessage {
                partition_key: "abc1234".to_string(),
                payload: i.to_string().into_bytes(),
                headers: MessageHeaders {
                    event_type: "click".to_string(),
                    version: "1.0".to_string(),
                    event_id: i.to_string(),
                },
            })
            .await
            .unwrap();
        }

        for i in 0..5 {
            let msg = bus.poll(Duration::from_millis(100)).await.unwrap();
            assert_eq!(msg.payload, i.to_string().into_bytes());
        }
    }

    #[tokio::test]
    async fn poll_times_out_on_an_empty_bus() {
        let bus = InMemoryClickBus::new();
        assert!(bus.poll(Duration::from_millis(10)).await.is_none());
    }
}
