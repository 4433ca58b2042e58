//! # Legacy Kafka Client Library
//!
//! A blocking Rust client for the legacy Kafka binary protocol: produce and
//! fetch requests over plain TCP, byte-offset addressing, gzip compression
//! envelopes and consumer-group offsets kept in an external registry.
//!
//! ## Features
//!
//! - **Exact framing**: timeouts and partial reads/writes handled in one place
//! - **Lazy decoding**: message sets are read from the socket on demand,
//!   descending into compressed envelopes transparently
//! - **Partitioned consumption**: every partition of a topic visited in turn,
//!   with explicit commit and resync of read offsets
//! - **Observability**: built-in metrics and tracing support
//!
//! ## Quick Start
//!
//! ### Producer Example
//!
//! ```rust,no_run
//! use kafka_legacy_client::*;
//!
//! fn main() -> Result<()> {
//!     let mut producer = Producer::new(
//!         ProducerConfigBuilder::new()
//!             .broker("localhost", 9092)
//!             .compression(CompressionType::Gzip)
//!             .build(),
//!     )?;
//!
//!     let written = producer.send(&["Hello", "World"], "my-topic")?;
//!     println!("Wrote {} bytes", written);
//!     Ok(())
//! }
//! ```
//!
//! ### Consumer Example
//!
//! ```rust,no_run
//! use kafka_legacy_client::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let registry = Arc::new(MemoryRegistry::new());
//!     registry.register_broker(0, "creator", "localhost", 9092)?;
//!     registry.register_topic("my-topic", 0, 1)?;
//!
//!     let config = ConsumerConfigBuilder::new()
//!         .group_id("my-group")
//!         .topic("my-topic")
//!         .build();
//!     let mut consumer = PartitionedConsumer::with_registry(config, registry)?;
//!
//!     for payload in consumer.by_ref() {
//!         println!("Received: {}", String::from_utf8_lossy(&payload?));
//!     }
//!     consumer.commit_offsets()?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod compression;
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod metrics;
pub mod partitioned;
pub mod producer;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use client::*;
pub use compression::{CompressionError, CompressionType};
pub use config::*;
pub use consumer::*;
pub use error::*;
pub use message::{BufferSource, Message, MessageSet, MessageSource, ResponseBody};
pub use partitioned::*;
pub use producer::*;
pub use protocol::{FetchRequest, OffsetRequest, ProduceRequest, Request, RANDOM_PARTITION};
pub use registry::{
    BrokerRegistry, CoordinatedRegistry, MemoryNodeStore, MemoryRegistry, NodeStore, OffsetStore,
    TopicRegistry,
};
pub use transport::Transport;

/// Client library result type
pub type Result<T> = std::result::Result<T, KafkaClientError>;

/// Client library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
