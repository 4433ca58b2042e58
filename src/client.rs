//! High-level client interface

use std::sync::Arc;

use crate::compression::CompressionType;
use crate::config::{ConnectionConfig, ConsumerConfig, CrcPolicy, ProducerConfig, Timeouts};
use crate::consumer::SimpleConsumer;
use crate::error::KafkaClientError;
use crate::partitioned::PartitionedConsumer;
use crate::producer::Producer;
use crate::registry::{BrokerRegistry, OffsetStore, TopicRegistry};

/// Entry point building producers and consumers for one broker
#[derive(Debug, Clone)]
pub struct KafkaClient {
    connection: ConnectionConfig,
}

impl KafkaClient {
    /// Create a new client
    pub fn new(connection: ConnectionConfig) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Create a producer compressing batches with `compression`
    pub fn producer(&self, compression: CompressionType) -> Result<Producer, KafkaClientError> {
        Producer::new(ProducerConfig {
            connection: self.connection.clone(),
            compression,
        })
    }

    /// Create a consumer reading directly from this broker
    pub fn simple_consumer(&self) -> SimpleConsumer {
        SimpleConsumer::new(self.connection.clone())
    }

    /// Create a consumer verifying message checksums
    pub fn verifying_consumer(&self) -> SimpleConsumer {
        SimpleConsumer::new(self.connection.clone()).with_crc_policy(CrcPolicy::Verify)
    }

    /// Create a consumer over every partition of a topic, located through
    /// the coordination registry rather than this client's broker
    pub fn partitioned_consumer<R>(
        &self,
        config: ConsumerConfig,
        registry: Arc<R>,
    ) -> Result<PartitionedConsumer, KafkaClientError>
    where
        R: TopicRegistry + BrokerRegistry + OffsetStore + 'static,
    {
        PartitionedConsumer::with_registry(config, registry)
    }
}

/// Convenience functions for quick client creation
impl KafkaClient {
    /// Create a client for a broker on localhost
    pub fn localhost() -> Self {
        Self::new(ConnectionConfig::new("localhost", 9092))
    }

    /// Create a client from a `host:port` address
    pub fn with_address(address: &str) -> Result<Self, KafkaClientError> {
        Ok(Self::new(ConnectionConfig::from_address(address)?))
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.connection.timeouts = timeouts;
        self
    }
}
