//! Coordination registry: topic layout, broker addresses and committed offsets
//!
//! The partitioned consumer only sees the three narrow traits below. The
//! [`CoordinatedRegistry`] adapter implements all of them on top of any
//! hierarchical [`NodeStore`] using the conventional node layout:
//!
//! ```text
//! /brokers/ids/{broker}                                  "creator:host:port"
//! /brokers/topics/{topic}/{broker}                       partition count
//! /consumers/{group}/offsets/{topic}/{broker}-{partition} committed offset
//! ```

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::KafkaClientError;

/// Topic → brokers hosting it and their partition counts
pub trait TopicRegistry: Send + Sync {
    fn partitions(&self, topic: &str) -> Result<BTreeMap<u32, u32>, KafkaClientError>;
}

/// Broker id → `host:port`
pub trait BrokerRegistry: Send + Sync {
    fn address(&self, broker: u32) -> Result<Option<String>, KafkaClientError>;
}

/// Committed read offsets per consumer group
pub trait OffsetStore: Send + Sync {
    /// Last committed offset, 0 when nothing was ever committed
    fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        broker: u32,
        partition: u32,
    ) -> Result<i64, KafkaClientError>;

    fn commit(
        &self,
        group: &str,
        topic: &str,
        broker: u32,
        partition: u32,
        offset: i64,
    ) -> Result<(), KafkaClientError>;
}

pub fn broker_path(broker: u32) -> String {
    format!("/brokers/ids/{}", broker)
}

pub fn topic_path(topic: &str) -> String {
    format!("/brokers/topics/{}", topic)
}

pub fn topic_broker_path(topic: &str, broker: u32) -> String {
    format!("/brokers/topics/{}/{}", topic, broker)
}

pub fn group_offsets_path(group: &str, topic: &str) -> String {
    format!("/consumers/{}/offsets/{}", group, topic)
}

pub fn offset_path(group: &str, topic: &str, broker: u32, partition: u32) -> String {
    format!("{}/{}-{}", group_offsets_path(group, topic), broker, partition)
}

/// Turn a broker registration (`creator:host:port`) into `host:port`
pub fn parse_broker_registration(registration: &str) -> Result<String, KafkaClientError> {
    let mut parts = registration.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_creator), Some(host), Some(port)) if !host.is_empty() && !port.is_empty() => {
            Ok(format!("{}:{}", host, port))
        }
        _ => Err(KafkaClientError::registry(format!(
            "'{}' is not a creator:host:port broker registration",
            registration
        ))),
    }
}

/// Hierarchical key/value store the registry lives in
pub trait NodeStore: Send + Sync {
    /// Node value, `None` when the node does not exist
    fn get(&self, path: &str) -> Result<Option<String>, KafkaClientError>;

    /// Names of the direct children of a node
    fn children(&self, path: &str) -> Result<Vec<String>, KafkaClientError>;

    /// Create or overwrite a node, creating missing parents
    fn set(&self, path: &str, value: &str) -> Result<(), KafkaClientError>;
}

/// In-memory node tree
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    nodes: Mutex<BTreeMap<String, String>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for MemoryNodeStore {
    fn get(&self, path: &str) -> Result<Option<String>, KafkaClientError> {
        Ok(self.nodes.lock().get(path).cloned())
    }

    fn children(&self, path: &str) -> Result<Vec<String>, KafkaClientError> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let nodes = self.nodes.lock();
        let children: BTreeSet<String> = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
            .filter(|child| !child.is_empty())
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }

    fn set(&self, path: &str, value: &str) -> Result<(), KafkaClientError> {
        if !path.starts_with('/') {
            return Err(KafkaClientError::registry(format!(
                "'{}' is not an absolute node path",
                path
            )));
        }
        let mut nodes = self.nodes.lock();
        let mut parent = String::new();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if let Some((_, ancestors)) = segments.split_last() {
            for segment in ancestors {
                parent.push('/');
                parent.push_str(segment);
                nodes.entry(parent.clone()).or_insert_with(|| "0".to_string());
            }
        }
        nodes.insert(path.to_string(), value.to_string());
        Ok(())
    }
}

/// Registry traits implemented over a node store
#[derive(Debug, Default)]
pub struct CoordinatedRegistry<N> {
    store: N,
}

/// Registry kept entirely in memory
pub type MemoryRegistry = CoordinatedRegistry<MemoryNodeStore>;

impl<N: NodeStore> CoordinatedRegistry<N> {
    pub fn with_store(store: N) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &N {
        &self.store
    }

    /// Publish a broker as `creator:host:port`
    pub fn register_broker(
        &self,
        broker: u32,
        creator: &str,
        host: &str,
        port: u16,
    ) -> Result<(), KafkaClientError> {
        self.store.set(
            &broker_path(broker),
            &format!("{}:{}:{}", creator, host, port),
        )
    }

    /// Publish how many partitions of `topic` a broker hosts
    pub fn register_topic(
        &self,
        topic: &str,
        broker: u32,
        partitions: u32,
    ) -> Result<(), KafkaClientError> {
        self.store
            .set(&topic_broker_path(topic, broker), &partitions.to_string())
    }

    /// Broker ids hosting `topic`
    pub fn brokers(&self, topic: &str) -> Result<Vec<u32>, KafkaClientError> {
        let mut brokers = Vec::new();
        for child in self.store.children(&topic_path(topic))? {
            match child.parse::<u32>() {
                Ok(broker) => brokers.push(broker),
                Err(_) => warn!("Ignoring non-numeric broker node '{}' under topic {}", child, topic),
            }
        }
        Ok(brokers)
    }

    /// Partition count of `topic` on one broker, 0 when unknown
    pub fn partitions_for_broker(&self, topic: &str, broker: u32) -> Result<u32, KafkaClientError> {
        let path = topic_broker_path(topic, broker);
        match self.store.get(&path)? {
            None => Ok(0),
            Some(value) if value.trim().is_empty() => Ok(0),
            Some(value) => value.trim().parse::<u32>().map_err(|_| {
                KafkaClientError::registry(format!("invalid partition count '{}' at {}", value, path))
            }),
        }
    }
}

impl<N: NodeStore> CoordinatedRegistry<N> {
    /// Every offset `group` has committed for `topic`, keyed by (broker, partition)
    pub fn committed_offsets(
        &self,
        group: &str,
        topic: &str,
    ) -> Result<BTreeMap<(u32, u32), i64>, KafkaClientError> {
        let mut offsets = BTreeMap::new();
        for child in self.store.children(&group_offsets_path(group, topic))? {
            let parsed: Option<(u32, u32)> = child.split_once('-').and_then(|(broker, partition)| {
                Some((broker.parse().ok()?, partition.parse().ok()?))
            });
            let Some((broker, partition)) = parsed else {
                warn!("Ignoring offset node '{}' of group {} on topic {}", child, group, topic);
                continue;
            };
            offsets.insert(
                (broker, partition),
                self.committed_offset(group, topic, broker, partition)?,
            );
        }
        Ok(offsets)
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<N: NodeStore> TopicRegistry for CoordinatedRegistry<N> {
    fn partitions(&self, topic: &str) -> Result<BTreeMap<u32, u32>, KafkaClientError> {
        let mut partitions = BTreeMap::new();
        for broker in self.brokers(topic)? {
            partitions.insert(broker, self.partitions_for_broker(topic, broker)?);
        }
        Ok(partitions)
    }
}

impl<N: NodeStore> BrokerRegistry for CoordinatedRegistry<N> {
    fn address(&self, broker: u32) -> Result<Option<String>, KafkaClientError> {
        match self.store.get(&broker_path(broker))? {
            None => Ok(None),
            Some(value) if value.is_empty() => Ok(None),
            Some(value) => parse_broker_registration(&value).map(Some),
        }
    }
}

impl<N: NodeStore> OffsetStore for CoordinatedRegistry<N> {
    fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        broker: u32,
        partition: u32,
    ) -> Result<i64, KafkaClientError> {
        let path = offset_path(group, topic, broker, partition);
        match self.store.get(&path)? {
            None => Ok(0),
            Some(value) if value.trim().is_empty() => Ok(0),
            Some(value) => value.trim().parse::<i64>().map_err(|_| {
                KafkaClientError::registry(format!("invalid offset '{}' at {}", value, path))
            }),
        }
    }

    fn commit(
        &self,
        group: &str,
        topic: &str,
        broker: u32,
        partition: u32,
        offset: i64,
    ) -> Result<(), KafkaClientError> {
        let path = offset_path(group, topic, broker, partition);
        debug!("Committing offset {} to {}", offset, path);
        self.store.set(&path, &offset.to_string())
    }
}
