//! Click event producer (component H).
//!
//! Grounded on `scheduling::worker`'s ticking background-task idiom and
//! `scheduling::queue::JobQueue`'s buffer/drain shape, generalized from a
//! Redis-backed priority queue to a bounded in-memory ring that opportunistically
//! flushes to the click bus.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::bus::{BusMessage, ClickBus, MessageHeaders};
use super::model::ClickEvent;

pub struct ProducerStats {
    pub buffered: usize,
    pub overflow_count: u64,
}

/// Buffers click events and flushes them to the bus on a ticking schedule
/// or opportunistically on publish.
pub struct ClickEventProducer {
    bus: Arc<dyn ClickBus>,
    buffer: Mutex<VecDeque<ClickEvent>>,
    capacity: usize,
    connected: AtomicBool,
    overflow_count: AtomicU64,
    /// Wakes the background flush loop for an opportunistic flush instead
    /// of spawning a new task per publish call.
    flush_requested: Notify,
}

impl ClickEventProducer {
    pub fn new(bus: Arc<dyn ClickBus>, capacity: usize) -> Self {
        Self {
            bus,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            connected: AtomicBool::new(false),
            overflow_count: AtomicU64::new(0),
            flush_requested: Notify::new(),
        }
    }

    /// Establish the bus connection. The in-process [`super::bus::InMemoryClickBus`]
    /// has no handshake, so this always succeeds on the first attempt; a
    /// networked broker client would retry with exponential backoff here up
    /// to `max_attempts`.
    pub async fn connect(&self, max_attempts: u32) {
        for attempt in 1..=max_attempts.max(1) {
            info!("click event producer connecting (attempt {attempt})");
            self.connected.store(true, Ordering::SeqCst);
            return;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Append `event` to the buffer. New events are dropped (not the
    /// oldest buffered ones) once the buffer is at capacity.
    pub fn publish(&self, event: ClickEvent) {
        {
            let mut buf = self.buffer.lock();
            if buf.len() >= self.capacity {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                warn!("click event buffer full, dropping event for {}", event.short_code);
                return;
            }
            buf.push_back(event);
        }

        if self.is_connected() {
            self.flush_requested.notify_one();
        }
    }

    /// Drain the buffer and send each event, partitioned by short code.
    /// Events that fail to send are re-prepended, oldest first, up to the
    /// capacity that remains after any events published during the flush.
    pub async fn flush(&self) {
        let drained: Vec<ClickEvent> = {
            let mut buf = self.buffer.lock();
            buf.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }

        let mut failed = Vec::new();
        for event in drained {
            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => {
                    warn!("failed to serialize click event {}: {e}", event.event_id);
                    continue;
                }
            };
            let message = BusMessage {
                partition_key: event.short_code.clone(),
                payload,
                headers: MessageHeaders {
                    event_type: "click".to_string(),
                    version: "1.0".to_string(),
                    event_id: event.event_id.clone(),
                },
            };
            if let Err(e) = self.bus.produce(message).await {
                warn!("click bus send failed for {}: {e}", event.short_code);
                failed.push(event);
            }
        }

        if failed.is_empty() {
            return;
        }

        let mut buf = self.buffer.lock();
        let remaining_capacity = self.capacity.saturating_sub(buf.len());
        let to_requeue = failed.len().min(remaining_capacity);
        let overflow = failed.len() - to_requeue;

        for event in failed.into_iter().take(to_requeue).rev() {
            buf.push_front(event);
        }
        if overflow > 0 {
            self.overflow_count.fetch_add(overflow as u64, Ordering::Relaxed);
            warn!("click event producer dropped {overflow} events on send failure");
        }
    }

    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            buffered: self.buffer.lock().len(),
            overflow_count: self.overflow_count(),
        }
    }

    /// Stop accepting flush ticks, drain synchronously, and mark
    /// disconnected.
    pub async fn shutdown(&self) {
        info!("click event producer shutting down, draining buffer");
        self.flush().await;
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Runs until the process exits: flushes on a fixed tick, or
    /// immediately when `publish` signals a non-empty buffer.
    pub fn spawn_flush_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.flush_requested.notified() => {}
                }
                self.flush().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::bus::InMemoryClickBus;

    #[tokio::test]
    async fn publish_then_flush_sends_to_the_bus() {
        let bus = Arc::new(InMemoryClickBus::new());
        let producer = Arc::new(ClickEventProducer::new(bus.clone(), 10));
        producer.connect(1).await;

        producer.publish(ClickEvent::new("abc1234".to_string()));
        producer.flush().await;

        let msg = bus.poll(Duration::from_millis(50)).await.unwrap();
        assert_eq!(msg.partition_key, "abc1234");
    }

    #[tokio::test]
    async fn buffer_at_capacity_drops_new_events_not_old_ones() {
        let bus = Arc::new(InMemoryClickBus::new());
        let producer = Arc::new(ClickEventProducer::new(bus, 2));

        producer.publish(ClickEvent::new("a".to_string()));
        producer.publish(ClickEvent::new("b".to_string()));
        producer.publish(ClickEvent::new("c".to_string()));

        assert_eq!(producer.overflow_count(), 1);
        assert_eq!(producer.stats().buffered, 2);
    }

    #[tokio::test]
    async fn shutdown_drains_the_buffer_synchronously() {
        let bus = Arc::new(InMemoryClickBus::new());
        let producer = Arc::new(ClickEventProducer::new(bus.clone(), 10));
        producer.connect(1).await;

        producer.publish(ClickEvent::new("abc1234".to_string()));
        producer.shutdown().await;

        assert_eq!(producer.stats().buffered, 0);
        assert!(!producer.is_connected());
    }
}
