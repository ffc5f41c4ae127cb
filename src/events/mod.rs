//! Click event pipeline: wire format, bus abstraction, buffered producer,
//! and the windowed aggregation consumer.

pub mod bus;
pub mod consumer;
pub mod model;
pub mod producer;

pub use bus::{BusError, BusMessage, ClickBus, InMemoryClickBus, MessageHeaders};
pub use consumer::AggregationConsumer;
pub use model::ClickEvent;
pub use producer::{ClickEventProducer, ProducerStats};
