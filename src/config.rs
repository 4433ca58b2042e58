//! Configuration types for the legacy Kafka client
//!
//! Connection parameters are plain values that can be persisted and shared;
//! live transports are built from them lazily on first use.

use crate::compression::CompressionType;
use crate::error::KafkaClientError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cap on the bytes returned by one fetch
pub const DEFAULT_FETCH_SIZE: u32 = 1_000_000;

/// Default cap on the bytes fetched per partition by the partitioned consumer
pub const DEFAULT_MAX_BATCH_SIZE: u32 = 20_000_000;

/// Send and receive deadlines for a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Maximum wait for incoming bytes while a read is outstanding
    pub recv: Duration,
    /// Maximum wait for the socket to accept bytes while a write is outstanding
    pub send: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            recv: Duration::from_micros(750_000),
            send: Duration::from_micros(100_000),
        }
    }
}

impl Timeouts {
    /// Build from two-part (seconds + microseconds) values
    pub fn from_parts(recv_secs: u64, recv_micros: u32, send_secs: u64, send_micros: u32) -> Self {
        Self {
            recv: Duration::from_secs(recv_secs) + Duration::from_micros(recv_micros as u64),
            send: Duration::from_secs(send_secs) + Duration::from_micros(send_micros as u64),
        }
    }

    /// Shorter receive deadline used by fetching consumers
    pub fn consumer_default() -> Self {
        Self {
            recv: Duration::from_micros(250_000),
            send: Duration::from_micros(100_000),
        }
    }

    pub fn validate(&self) -> Result<(), KafkaClientError> {
        if self.recv.is_zero() || self.send.is_zero() {
            return Err(KafkaClientError::invalid_config(
                "send and receive timeouts must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Where and how to reach one broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: i32,
    pub timeouts: Timeouts,
}

impl ConnectionConfig {
    pub fn new<S: Into<String>>(host: S, port: i32) -> Self {
        Self {
            host: host.into(),
            port,
            timeouts: Timeouts::default(),
        }
    }

    /// Parse a `host:port` address as published by the broker registry
    pub fn from_address(address: &str) -> Result<Self, KafkaClientError> {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            KafkaClientError::invalid_config(format!("'{}' is not a host:port address", address))
        })?;
        let port = port.trim().parse::<i32>().map_err(|_| {
            KafkaClientError::invalid_config(format!("invalid port in address '{}'", address))
        })?;
        Ok(Self::new(host.trim(), port))
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// `host:port` form of this endpoint
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Whether message checksums are verified while iterating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrcPolicy {
    /// Deliver messages without checking; callers may use `Message::is_valid`
    #[default]
    Skip,
    /// Abort iteration with `CorruptMessage` on the first checksum mismatch
    Verify,
}

/// Producer-specific configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Broker connection parameters
    pub connection: ConnectionConfig,
    /// Compression applied to each produced batch as a whole
    pub compression: CompressionType,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::new("localhost", 9092),
            compression: CompressionType::Gzip,
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<(), KafkaClientError> {
        self.connection.timeouts.validate()?;
        if self.compression == CompressionType::Snappy {
            return Err(KafkaClientError::unsupported(
                "snappy compression is not implemented",
            ));
        }
        Ok(())
    }
}

/// Partitioned consumer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer group the committed offsets belong to
    pub group_id: String,
    /// Topic to consume
    pub topic: String,
    /// Maximum bytes requested per partition fetch
    pub max_batch_size: u32,
    /// Timeouts for every per-partition transport
    pub timeouts: Timeouts,
    /// Checksum handling while draining fetched message sets
    pub crc_policy: CrcPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            topic: String::new(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            timeouts: Timeouts::consumer_default(),
            crc_policy: CrcPolicy::Skip,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), KafkaClientError> {
        if self.group_id.is_empty() {
            return Err(KafkaClientError::invalid_config(
                "a consumer group must be specified",
            ));
        }
        if self.topic.is_empty() {
            return Err(KafkaClientError::invalid_config("a topic must be specified"));
        }
        if self.max_batch_size == 0 || self.max_batch_size > i32::MAX as u32 {
            return Err(KafkaClientError::invalid_config(format!(
                "max batch size {} is out of range",
                self.max_batch_size
            )));
        }
        self.timeouts.validate()
    }
}

/// Builder for ProducerConfig
#[derive(Debug, Default)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broker<S: Into<String>>(mut self, host: S, port: i32) -> Self {
        self.config.connection.host = host.into();
        self.config.connection.port = port;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.connection.timeouts = timeouts;
        self
    }

    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.config.compression = compression;
        self
    }

    pub fn build(self) -> ProducerConfig {
        self.config
    }
}

/// Builder for ConsumerConfig
#[derive(Debug, Default)]
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.config.group_id = group_id.into();
        self
    }

    pub fn topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.config.topic = topic.into();
        self
    }

    pub fn max_batch_size(mut self, max_batch_size: u32) -> Self {
        self.config.max_batch_size = max_batch_size;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn crc_policy(mut self, crc_policy: CrcPolicy) -> Self {
        self.config.crc_policy = crc_policy;
        self
    }

    pub fn build(self) -> ConsumerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_from_parts() {
        let timeouts = Timeouts::from_parts(1, 500_000, 0, 100_000);
        assert_eq!(timeouts.recv, Duration::from_millis(1500));
        assert_eq!(timeouts.send, Duration::from_millis(100));
        assert!(timeouts.validate().is_ok());

        let zero = Timeouts::from_parts(0, 0, 0, 100_000);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_connection_from_address() {
        let config = ConnectionConfig::from_address("broker-1.local:9092").unwrap();
        assert_eq!(config.host, "broker-1.local");
        assert_eq!(config.port, 9092);
        assert_eq!(config.address(), "broker-1.local:9092");

        assert!(ConnectionConfig::from_address("no-port").is_err());
        assert!(ConnectionConfig::from_address("host:abc").is_err());
    }

    #[test]
    fn test_producer_config_builder() {
        let config = ProducerConfigBuilder::new()
            .broker("localhost", 9093)
            .compression(CompressionType::None)
            .build();

        assert_eq!(config.connection.port, 9093);
        assert_eq!(config.compression, CompressionType::None);
        assert!(config.validate().is_ok());

        let snappy = ProducerConfigBuilder::new()
            .compression(CompressionType::Snappy)
            .build();
        assert!(matches!(
            snappy.validate(),
            Err(KafkaClientError::UnsupportedFeature { .. })
        ));
    }

    #[test]
    fn test_consumer_config_builder() {
        let config = ConsumerConfigBuilder::new()
            .group_id("test-group")
            .topic("test-topic")
            .max_batch_size(4096)
            .crc_policy(CrcPolicy::Verify)
            .build();

        assert_eq!(config.group_id, "test-group");
        assert_eq!(config.topic, "test-topic");
        assert_eq!(config.max_batch_size, 4096);
        assert_eq!(config.crc_policy, CrcPolicy::Verify);
        assert!(config.validate().is_ok());

        assert!(ConsumerConfig::default().validate().is_err());
    }

    #[test]
    fn test_connection_config_persists() {
        let config = ConnectionConfig::new("broker", 9092)
            .with_timeouts(Timeouts::from_parts(2, 0, 1, 0));
        let json = serde_json::to_string(&config).unwrap();
        let restored: ConnectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
