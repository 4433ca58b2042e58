//! Consumer spreading reads over every partition of a topic
//!
//! One cursor is kept per (broker, partition) pair discovered through the
//! registry. Each pass visits the cursors in order: an idle cursor fetches a
//! batch at its read position, the batch is drained message by message, and
//! its byte count is folded into the cursor before moving on. Passes repeat
//! while at least one cursor produced data.

use bytes::Bytes;
use rand::seq::SliceRandom;
use std::fmt;
use std::mem;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, ConsumerConfig};
use crate::consumer::{OwnedMessageSet, SimpleConsumer, OFFSET_EARLIEST, OFFSET_LATEST};
use crate::error::KafkaClientError;
use crate::message::Message;
use crate::metrics::global_metrics;
use crate::protocol::FetchRequest;
use crate::registry::{BrokerRegistry, OffsetStore, TopicRegistry};

/// Decides the order in which cursors are visited within a pass
pub trait PartitionOrdering: Send + Sync {
    fn order(&self, cursors: &mut [PartitionCursor]);
}

/// Random order, re-drawn on every rewind
#[derive(Debug, Default, Clone, Copy)]
pub struct ShuffleOrdering;

impl PartitionOrdering for ShuffleOrdering {
    fn order(&self, cursors: &mut [PartitionCursor]) {
        cursors.shuffle(&mut rand::thread_rng());
    }
}

/// Registry order: brokers ascending, then partitions ascending
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryOrdering;

impl PartitionOrdering for RegistryOrdering {
    fn order(&self, _cursors: &mut [PartitionCursor]) {}
}

enum CursorState {
    Idle,
    Draining(OwnedMessageSet),
    Failed,
}

/// Read progress on one partition of one broker
pub struct PartitionCursor {
    broker: u32,
    partition: u32,
    connection: ConnectionConfig,
    committed_offset: i64,
    uncommitted_offset: i64,
    consumer: SimpleConsumer,
    state: CursorState,
    needs_resync: bool,
    // bytes of the in-flight set already covered by an early commit
    committed_in_flight: u64,
    delivered: u64,
}

impl fmt::Debug for PartitionCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionCursor")
            .field("broker", &self.broker)
            .field("partition", &self.partition)
            .field("address", &self.connection.address())
            .field("committed_offset", &self.committed_offset)
            .field("uncommitted_offset", &self.uncommitted_offset)
            .field("in_flight_bytes", &self.in_flight_bytes())
            .field("needs_resync", &self.needs_resync)
            .finish()
    }
}

impl PartitionCursor {
    fn new(
        broker: u32,
        partition: u32,
        connection: ConnectionConfig,
        committed_offset: i64,
        config: &ConsumerConfig,
    ) -> Self {
        let consumer = SimpleConsumer::new(connection.clone()).with_crc_policy(config.crc_policy);
        Self {
            broker,
            partition,
            connection,
            committed_offset,
            uncommitted_offset: 0,
            consumer,
            state: CursorState::Idle,
            needs_resync: false,
            committed_in_flight: 0,
            delivered: 0,
        }
    }

    pub fn broker(&self) -> u32 {
        self.broker
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// `host:port` of the broker serving this partition
    pub fn address(&self) -> String {
        self.connection.address()
    }

    pub fn committed_offset(&self) -> i64 {
        self.committed_offset
    }

    /// Bytes read since the last commit, excluding the batch being drained
    pub fn uncommitted_offset(&self) -> i64 {
        self.uncommitted_offset
    }

    /// Offset the next fetch starts at
    pub fn fetch_offset(&self) -> i64 {
        self.committed_offset + self.uncommitted_offset
    }

    /// Bytes of the batch being drained that are not yet committed
    pub fn in_flight_bytes(&self) -> u64 {
        match &self.state {
            CursorState::Draining(set) => set.valid_bytes().saturating_sub(self.committed_in_flight),
            _ => 0,
        }
    }

    /// Offset just past everything read from this partition
    pub fn read_position(&self) -> i64 {
        self.fetch_offset() + self.in_flight_bytes() as i64
    }

    pub fn is_draining(&self) -> bool {
        matches!(self.state, CursorState::Draining(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, CursorState::Failed)
    }

    /// Whether the broker rejected this cursor's offset as out of range
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    fn fetch_request(&self, topic: &str, max_batch_size: u32) -> FetchRequest {
        FetchRequest::new(topic, self.partition, self.fetch_offset(), max_batch_size)
    }

    fn current(&self) -> Option<&Message> {
        match &self.state {
            CursorState::Draining(set) => set.current(),
            _ => None,
        }
    }

    /// Fetch a batch when idle; true while positioned on a message
    fn poll(&mut self, topic: &str, max_batch_size: u32) -> Result<bool, KafkaClientError> {
        if let CursorState::Idle = self.state {
            let request = self.fetch_request(topic, max_batch_size);
            match self.consumer.fetch_owned(&request) {
                Ok(Some(set)) => self.state = CursorState::Draining(set),
                Ok(None) => return Ok(false),
                Err(e) => {
                    self.fail(&e);
                    return Err(e);
                }
            }
        }
        Ok(matches!(&self.state, CursorState::Draining(set) if set.valid()))
    }

    fn advance(&mut self) -> Result<(), KafkaClientError> {
        let result = match &mut self.state {
            CursorState::Draining(set) => set.advance(),
            _ => return Ok(()),
        };
        if result.is_ok() {
            self.delivered += 1;
        }
        result
    }

    fn fail(&mut self, err: &KafkaClientError) {
        warn!(
            "Partition {}-{} failed at offset {}: {}",
            self.broker,
            self.partition,
            self.fetch_offset(),
            err
        );
        if err.is_offset_out_of_range() {
            self.needs_resync = true;
        }
        self.state = CursorState::Failed;
        self.consumer.close();
    }

    /// Fold a drained batch into the cursor; returns the batch's byte count
    fn finish_batch(&mut self) -> u64 {
        if !self.is_draining() {
            return 0;
        }
        let CursorState::Draining(set) = mem::replace(&mut self.state, CursorState::Idle) else {
            return 0;
        };
        let read = set.valid_bytes();
        self.uncommitted_offset += read.saturating_sub(self.committed_in_flight) as i64;
        self.committed_in_flight = 0;
        global_metrics().record_consume(mem::take(&mut self.delivered), read);
        self.consumer.reclaim(set);
        read
    }

    /// Make a cursor failed in the previous pass eligible again
    fn retry(&mut self) {
        if let CursorState::Failed = self.state {
            self.state = CursorState::Idle;
        }
    }

    /// Move the cursor to `offset`, discarding any unread batch
    fn reset_to(&mut self, offset: i64) {
        if let CursorState::Draining(set) = mem::replace(&mut self.state, CursorState::Idle) {
            self.consumer.reclaim(set);
        }
        self.committed_offset = offset;
        self.uncommitted_offset = 0;
        self.committed_in_flight = 0;
        self.delivered = 0;
        self.needs_resync = false;
    }

    /// Short-lived consumer for offset lookups, independent of the batch transport
    fn lookup_consumer(&self) -> SimpleConsumer {
        SimpleConsumer::new(self.connection.clone())
    }
}

#[derive(Debug, Default)]
struct Session {
    cursors: Vec<PartitionCursor>,
    idx: usize,
    read_bytes: u64,
    has_more: bool,
}

/// Consumer over every partition of one topic, coordinated through a registry
pub struct PartitionedConsumer {
    config: ConsumerConfig,
    topics: Arc<dyn TopicRegistry>,
    brokers: Arc<dyn BrokerRegistry>,
    offsets: Arc<dyn OffsetStore>,
    ordering: Box<dyn PartitionOrdering>,
    session: Option<Session>,
    yielded: bool,
}

impl fmt::Debug for PartitionedConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedConsumer")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish()
    }
}

impl PartitionedConsumer {
    pub fn new(
        config: ConsumerConfig,
        topics: Arc<dyn TopicRegistry>,
        brokers: Arc<dyn BrokerRegistry>,
        offsets: Arc<dyn OffsetStore>,
    ) -> Result<Self, KafkaClientError> {
        config.validate()?;
        Ok(Self {
            config,
            topics,
            brokers,
            offsets,
            ordering: Box::new(ShuffleOrdering),
            session: None,
            yielded: false,
        })
    }

    /// Consumer whose three registry roles are served by one object
    pub fn with_registry<R>(config: ConsumerConfig, registry: Arc<R>) -> Result<Self, KafkaClientError>
    where
        R: TopicRegistry + BrokerRegistry + OffsetStore + 'static,
    {
        Self::new(config, registry.clone(), registry.clone(), registry)
    }

    pub fn with_ordering<O: PartitionOrdering + 'static>(mut self, ordering: O) -> Self {
        self.ordering = Box::new(ordering);
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Cursors of the current session, in visiting order
    pub fn cursors(&self) -> &[PartitionCursor] {
        self.session
            .as_ref()
            .map(|session| session.cursors.as_slice())
            .unwrap_or(&[])
    }

    /// Rebuild all cursors from the registry and start a new session
    pub fn rewind(&mut self) -> Result<(), KafkaClientError> {
        self.session = None;
        self.yielded = false;

        let topic = &self.config.topic;
        let mut cursors = Vec::new();
        for (broker, partition_count) in self.topics.partitions(topic)? {
            if partition_count == 0 {
                continue;
            }
            let address = self.brokers.address(broker)?.ok_or_else(|| {
                KafkaClientError::registry(format!("no address registered for broker {}", broker))
            })?;
            let connection =
                ConnectionConfig::from_address(&address)?.with_timeouts(self.config.timeouts);

            for partition in 0..partition_count {
                let committed =
                    self.offsets
                        .committed_offset(&self.config.group_id, topic, broker, partition)?;
                cursors.push(PartitionCursor::new(
                    broker,
                    partition,
                    connection.clone(),
                    committed,
                    &self.config,
                ));
            }
        }

        if cursors.is_empty() {
            return Err(KafkaClientError::TopicNotFound {
                topic: topic.clone(),
            });
        }
        self.ordering.order(&mut cursors);

        info!(
            "Consuming {} partitions of topic {} for group {}",
            cursors.len(),
            topic,
            self.config.group_id
        );
        self.session = Some(Session {
            cursors,
            ..Session::default()
        });
        Ok(())
    }

    /// Whether a message is available, fetching batches as needed
    ///
    /// A fetch failure is returned once; the failing cursor is skipped for
    /// the rest of the pass and the next call carries on with the others.
    pub fn valid(&mut self) -> Result<bool, KafkaClientError> {
        let topic = self.config.topic.as_str();
        let max_batch_size = self.config.max_batch_size;
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };

        loop {
            if session.idx >= session.cursors.len() {
                if !session.has_more {
                    return Ok(false);
                }
                debug!("Starting another pass over {} partitions", session.cursors.len());
                session.has_more = false;
                session.idx = 0;
                session.cursors.iter_mut().for_each(PartitionCursor::retry);
            }

            let cursor = &mut session.cursors[session.idx];
            match cursor.poll(topic, max_batch_size) {
                Ok(true) => {
                    session.has_more = true;
                    return Ok(true);
                }
                Ok(false) => {
                    session.read_bytes += cursor.finish_batch();
                    session.idx += 1;
                }
                Err(e) => {
                    session.idx += 1;
                    return Err(e);
                }
            }
        }
    }

    /// Message the consumer is positioned on
    pub fn current(&self) -> Option<&Message> {
        let session = self.session.as_ref()?;
        session.cursors.get(session.idx)?.current()
    }

    /// Step past the current message
    pub fn advance(&mut self) -> Result<(), KafkaClientError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some(cursor) = session.cursors.get_mut(session.idx) else {
            return Ok(());
        };
        match cursor.advance() {
            Ok(()) => Ok(()),
            Err(e) => {
                session.read_bytes += cursor.finish_batch();
                cursor.fail(&e);
                session.idx += 1;
                Err(e)
            }
        }
    }

    /// Bytes read in this session, including the batch being drained
    pub fn read_bytes(&self) -> u64 {
        let Some(session) = self.session.as_ref() else {
            return 0;
        };
        let in_flight: u64 = session
            .cursors
            .iter()
            .map(|cursor| match &cursor.state {
                CursorState::Draining(set) => set.valid_bytes(),
                _ => 0,
            })
            .sum();
        session.read_bytes + in_flight
    }

    /// Persist the read position of every cursor with unsaved progress
    ///
    /// Every cursor is attempted; the first failure is returned.
    pub fn commit_offsets(&mut self) -> Result<(), KafkaClientError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let group = self.config.group_id.as_str();
        let topic = self.config.topic.as_str();

        let mut first_error = None;
        for cursor in session.cursors.iter_mut() {
            let in_flight = cursor.in_flight_bytes();
            let pending = cursor.uncommitted_offset + in_flight as i64;
            if pending <= 0 {
                continue;
            }

            let target = cursor.committed_offset + pending;
            match self
                .offsets
                .commit(group, topic, cursor.broker, cursor.partition, target)
            {
                Ok(()) => {
                    debug!(
                        "Committed offset {} for partition {}-{}",
                        target, cursor.broker, cursor.partition
                    );
                    cursor.committed_offset = target;
                    cursor.uncommitted_offset = 0;
                    cursor.committed_in_flight += in_flight;
                    global_metrics().record_commit();
                }
                Err(e) => {
                    warn!(
                        "Could not commit offset {} for partition {}-{}: {}",
                        target, cursor.broker, cursor.partition, e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reset cursors whose offset the broker rejects to the earliest
    /// available offset; returns how many were reset
    pub fn resync_offsets(&mut self) -> Result<usize, KafkaClientError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(0);
        };
        let group = self.config.group_id.as_str();
        let topic = self.config.topic.as_str();
        let max_batch_size = self.config.max_batch_size;

        let mut reset = 0;
        for cursor in session.cursors.iter_mut() {
            if !cursor.needs_resync && !cursor.is_draining() {
                // check the current position; the batch itself is not delivered
                let request = cursor.fetch_request(topic, max_batch_size);
                match cursor.consumer.fetch_owned(&request) {
                    Ok(Some(set)) => cursor.consumer.reclaim(set),
                    Ok(None) => {}
                    Err(e) if e.is_offset_out_of_range() => cursor.needs_resync = true,
                    Err(e) => debug!(
                        "Offset check of partition {}-{} failed: {}",
                        cursor.broker, cursor.partition, e
                    ),
                }
            }
            if !cursor.needs_resync {
                continue;
            }

            let mut lookup = cursor.lookup_consumer();
            let earliest = lookup.offsets_before(topic, cursor.partition, OFFSET_EARLIEST, 1);
            lookup.close();
            let Some(&earliest) = earliest?.first() else {
                continue;
            };

            self.offsets
                .commit(group, topic, cursor.broker, cursor.partition, earliest)?;
            info!(
                "Resynced partition {}-{} from offset {} to {}",
                cursor.broker,
                cursor.partition,
                cursor.fetch_offset(),
                earliest
            );
            cursor.reset_to(earliest);
            global_metrics().record_resync();
            reset += 1;
        }
        Ok(reset)
    }

    /// Bytes between each cursor's read position and the latest offset
    ///
    /// Best-effort: partitions whose broker cannot be asked are skipped.
    pub fn remaining_size(&mut self) -> Result<u64, KafkaClientError> {
        if self.cursors().is_empty() {
            self.rewind()?;
        }
        let topic = self.config.topic.as_str();

        let mut total = 0u64;
        for cursor in self.cursors() {
            let mut lookup = cursor.lookup_consumer();
            let latest = lookup.offsets_before(topic, cursor.partition, OFFSET_LATEST, 1);
            lookup.close();
            match latest {
                Ok(offsets) => {
                    if let Some(&latest) = offsets.first() {
                        total += (latest - cursor.read_position()).max(0) as u64;
                    }
                }
                Err(e) => warn!(
                    "Could not look up latest offset of partition {}-{}: {}",
                    cursor.broker, cursor.partition, e
                ),
            }
        }
        Ok(total)
    }

    /// Close every partition connection; cursors keep their positions
    pub fn close(&mut self) {
        if let Some(session) = self.session.as_mut() {
            for cursor in session.cursors.iter_mut() {
                if let CursorState::Draining(set) = mem::replace(&mut cursor.state, CursorState::Idle) {
                    cursor.consumer.reclaim(set);
                }
                cursor.committed_in_flight = 0;
                cursor.consumer.close();
            }
        }
    }
}

impl Iterator for PartitionedConsumer {
    type Item = Result<Bytes, KafkaClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.session.is_none() {
            if let Err(e) = self.rewind() {
                // stop after reporting; a later rewind can start over
                self.session = Some(Session::default());
                return Some(Err(e));
            }
        }
        if self.yielded {
            self.yielded = false;
            if let Err(e) = self.advance() {
                return Some(Err(e));
            }
        }
        match self.valid() {
            Ok(true) => {
                let payload = self.current()?.payload().clone();
                self.yielded = true;
                Some(Ok(payload))
            }
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsumerConfigBuilder;
    use crate::registry::MemoryRegistry;

    fn config() -> ConsumerConfig {
        ConsumerConfigBuilder::new()
            .group_id("group")
            .topic("events")
            .build()
    }

    fn registry() -> Arc<MemoryRegistry> {
        let registry = Arc::new(MemoryRegistry::new());
        registry.register_broker(0, "c0", "127.0.0.1", 9092).unwrap();
        registry.register_broker(1, "c1", "127.0.0.1", 9093).unwrap();
        registry.register_topic("events", 0, 2).unwrap();
        registry.register_topic("events", 1, 1).unwrap();
        registry.commit("group", "events", 0, 1, 300).unwrap();
        registry
    }

    #[test]
    fn test_rewind_builds_cursors_in_registry_order() {
        let mut consumer = PartitionedConsumer::with_registry(config(), registry())
            .unwrap()
            .with_ordering(RegistryOrdering);
        assert!(consumer.cursors().is_empty());
        consumer.rewind().unwrap();

        let layout: Vec<_> = consumer
            .cursors()
            .iter()
            .map(|c| (c.broker(), c.partition(), c.committed_offset()))
            .collect();
        assert_eq!(layout, vec![(0, 0, 0), (0, 1, 300), (1, 0, 0)]);
        assert_eq!(consumer.cursors()[2].address(), "127.0.0.1:9093");
        assert_eq!(consumer.cursors()[1].fetch_offset(), 300);
        assert_eq!(consumer.read_bytes(), 0);
    }

    #[test]
    fn test_shuffle_keeps_every_cursor() {
        let mut consumer = PartitionedConsumer::with_registry(config(), registry()).unwrap();
        consumer.rewind().unwrap();

        let mut layout: Vec<_> = consumer
            .cursors()
            .iter()
            .map(|c| (c.broker(), c.partition()))
            .collect();
        layout.sort();
        assert_eq!(layout, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn test_unknown_topic() {
        let config = ConsumerConfigBuilder::new()
            .group_id("group")
            .topic("missing")
            .build();
        let mut consumer = PartitionedConsumer::with_registry(config, registry()).unwrap();
        assert!(matches!(
            consumer.rewind(),
            Err(KafkaClientError::TopicNotFound { .. })
        ));

        // the iterator reports the failure once, then stops
        assert!(matches!(
            consumer.next(),
            Some(Err(KafkaClientError::TopicNotFound { .. }))
        ));
        assert!(consumer.next().is_none());
    }

    #[test]
    fn test_missing_broker_address() {
        let registry = registry();
        registry.register_topic("events", 7, 1).unwrap();
        let mut consumer = PartitionedConsumer::with_registry(config(), registry).unwrap();
        assert!(matches!(
            consumer.rewind(),
            Err(KafkaClientError::Registry { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ConsumerConfigBuilder::new().topic("events").build();
        assert!(PartitionedConsumer::with_registry(config, registry()).is_err());
    }

    /// Offset store refusing commits for one partition
    struct RefusingStore {
        inner: Arc<MemoryRegistry>,
        refused: (u32, u32),
    }

    impl OffsetStore for RefusingStore {
        fn committed_offset(
            &self,
            group: &str,
            topic: &str,
            broker: u32,
            partition: u32,
        ) -> Result<i64, KafkaClientError> {
            self.inner.committed_offset(group, topic, broker, partition)
        }

        fn commit(
            &self,
            group: &str,
            topic: &str,
            broker: u32,
            partition: u32,
            offset: i64,
        ) -> Result<(), KafkaClientError> {
            if (broker, partition) == self.refused {
                return Err(KafkaClientError::registry("node is read-only"));
            }
            self.inner.commit(group, topic, broker, partition, offset)
        }
    }

    #[test]
    fn test_commit_failure_leaves_other_cursors_committed() {
        let registry = registry();
        let store = Arc::new(RefusingStore {
            inner: registry.clone(),
            refused: (0, 1),
        });
        let mut consumer =
            PartitionedConsumer::new(config(), registry.clone(), registry.clone(), store)
                .unwrap()
                .with_ordering(RegistryOrdering);
        consumer.rewind().unwrap();
        for cursor in consumer.session.as_mut().unwrap().cursors.iter_mut() {
            cursor.uncommitted_offset = 20;
        }

        assert!(matches!(
            consumer.commit_offsets(),
            Err(KafkaClientError::Registry { .. })
        ));

        let state: Vec<_> = consumer
            .cursors()
            .iter()
            .map(|c| (c.broker(), c.partition(), c.committed_offset(), c.uncommitted_offset()))
            .collect();
        assert_eq!(state, vec![(0, 0, 20, 0), (0, 1, 300, 20), (1, 0, 20, 0)]);
        assert_eq!(registry.committed_offset("group", "events", 0, 0).unwrap(), 20);
        assert_eq!(registry.committed_offset("group", "events", 0, 1).unwrap(), 300);
        assert_eq!(registry.committed_offset("group", "events", 1, 0).unwrap(), 20);
    }

    #[test]
    fn test_commit_without_session_is_noop() {
        let mut consumer = PartitionedConsumer::with_registry(config(), registry()).unwrap();
        consumer.commit_offsets().unwrap();
        assert_eq!(consumer.resync_offsets().unwrap(), 0);
        assert!(!consumer.valid().unwrap());
        assert!(consumer.current().is_none());
    }
}
