//! Producer client for publishing message batches

use bytes::Bytes;
use tracing::{debug, info};

use crate::config::{ProducerConfig, ProducerConfigBuilder};
use crate::error::KafkaClientError;
use crate::metrics::global_metrics;
use crate::protocol::{ProduceRequest, Request, RANDOM_PARTITION};
use crate::transport::Transport;

/// Producer writing produce requests to one broker
///
/// Produce requests carry no acknowledgement; a successful send means every
/// byte of the frame was handed to the socket.
#[derive(Debug)]
pub struct Producer {
    config: ProducerConfig,
    transport: Option<Transport>,
}

impl Producer {
    /// Create a new producer; the connection is opened on first send
    pub fn new(config: ProducerConfig) -> Result<Self, KafkaClientError> {
        config.validate()?;
        Ok(Self {
            config,
            transport: None,
        })
    }

    /// Create a producer builder
    pub fn builder() -> ProducerConfigBuilder {
        ProducerConfigBuilder::new()
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_connected)
    }

    pub fn connect(&mut self) -> Result<(), KafkaClientError> {
        self.transport()?;
        Ok(())
    }

    /// Close the connection; the next send reconnects
    pub fn close(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
            info!("Producer connection to {} closed", self.config.connection.address());
        }
    }

    fn transport(&mut self) -> Result<&mut Transport, KafkaClientError> {
        let transport = self
            .transport
            .get_or_insert_with(|| Transport::new(self.config.connection.clone()));
        transport.connect()?;
        Ok(transport)
    }

    /// Send a batch and let the broker pick the partition
    pub fn send<P: AsRef<[u8]>>(&mut self, messages: &[P], topic: &str) -> Result<usize, KafkaClientError> {
        self.send_to(messages, topic, RANDOM_PARTITION)
    }

    /// Send a batch to one partition; returns the number of bytes written
    pub fn send_to<P: AsRef<[u8]>>(
        &mut self,
        messages: &[P],
        topic: &str,
        partition: u32,
    ) -> Result<usize, KafkaClientError> {
        let messages = messages
            .iter()
            .map(|message| Bytes::copy_from_slice(message.as_ref()))
            .collect();
        let request = ProduceRequest::new(topic, partition, messages, self.config.compression);
        self.send_request(&request)
    }

    pub fn send_request(&mut self, request: &ProduceRequest) -> Result<usize, KafkaClientError> {
        if request.messages.is_empty() {
            return Err(KafkaClientError::invalid_config(
                "cannot send an empty batch of messages",
            ));
        }

        let frame = Request::Produce(request.clone()).encode()?;
        let metrics = global_metrics();
        let result = self.transport().and_then(|transport| transport.write(&frame));
        match result {
            Ok(written) => {
                metrics.record_send(written as u64);
                debug!(
                    "Sent {} messages ({} bytes) to {}:{}",
                    request.messages.len(),
                    written,
                    request.topic,
                    request.partition
                );
                Ok(written)
            }
            Err(e) => {
                metrics.record_send_error();
                Err(e)
            }
        }
    }
}
