mod common;

use std::sync::Arc;

use common::{init_tracing, MockBroker};
use kafka_legacy_client::{
    protocol::encode_message_set, ConsumerConfig, ConsumerConfigBuilder, KafkaClientError,
    MemoryRegistry, OffsetStore, PartitionedConsumer, RegistryOrdering, Timeouts,
};

const TOPIC: &str = "events";
const GROUP: &str = "readers";

fn config() -> ConsumerConfig {
    ConsumerConfigBuilder::new()
        .group_id(GROUP)
        .topic(TOPIC)
        .timeouts(Timeouts::consumer_default())
        .build()
}

/// Partition 0 holds three 20-byte messages, partition 1 a single 15-byte one
fn two_partitions() -> (MockBroker, Arc<MemoryRegistry>) {
    init_tracing();
    let broker = MockBroker::start();
    broker.append(
        TOPIC,
        0,
        &encode_message_set(&["message #1", "message #2", "message #3"]).unwrap(),
    );
    broker.append(TOPIC, 1, &encode_message_set(&["other"]).unwrap());
    let registry = broker.registry(TOPIC, 2);
    (broker, registry)
}

fn consumer(registry: &Arc<MemoryRegistry>) -> PartitionedConsumer {
    PartitionedConsumer::with_registry(config(), registry.clone())
        .unwrap()
        .with_ordering(RegistryOrdering)
}

fn committed(registry: &MemoryRegistry, partition: u32) -> i64 {
    registry
        .committed_offset(GROUP, TOPIC, 0, partition)
        .unwrap()
}

fn text(payload: &[u8]) -> String {
    String::from_utf8(payload.to_vec()).unwrap()
}

#[test]
fn test_consume_all_partitions_and_commit() {
    let (_broker, registry) = two_partitions();
    let mut consumer = consumer(&registry);

    let payloads: Vec<String> = consumer.by_ref().map(|p| text(&p.unwrap())).collect();
    assert_eq!(payloads, vec!["message #1", "message #2", "message #3", "other"]);
    assert_eq!(consumer.read_bytes(), 75);

    consumer.commit_offsets().unwrap();
    assert_eq!(committed(&registry, 0), 60);
    assert_eq!(committed(&registry, 1), 15);

    // a new session picks up where the group left off
    let mut resumed = self::consumer(&registry);
    assert!(resumed.next().is_none());
    assert_eq!(resumed.cursors()[0].committed_offset(), 60);
}

#[test]
fn test_commit_while_draining_is_not_counted_twice() {
    let (_broker, registry) = two_partitions();
    let mut consumer = consumer(&registry);

    consumer.rewind().unwrap();
    assert!(consumer.valid().unwrap());
    assert_eq!(text(consumer.current().unwrap().payload()), "message #1");

    consumer.commit_offsets().unwrap();
    assert_eq!(committed(&registry, 0), 20);
    assert_eq!(consumer.cursors()[0].in_flight_bytes(), 0);

    let mut seen = vec!["message #1".to_string()];
    consumer.advance().unwrap();
    while consumer.valid().unwrap() {
        seen.push(text(consumer.current().unwrap().payload()));
        consumer.advance().unwrap();
    }
    assert_eq!(seen.len(), 4);

    consumer.commit_offsets().unwrap();
    assert_eq!(committed(&registry, 0), 60);
    assert_eq!(committed(&registry, 1), 15);
    assert_eq!(consumer.cursors()[0].uncommitted_offset(), 0);
}

#[test]
fn test_out_of_range_then_resync() {
    let (broker, registry) = two_partitions();
    broker.set_earliest(TOPIC, 0, 20);
    registry.commit(GROUP, TOPIC, 0, 0, 10_000).unwrap();
    let mut consumer = consumer(&registry);

    let results: Vec<_> = consumer.by_ref().collect();
    let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    let payloads: Vec<String> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|p| text(p))
        .collect();
    assert!(!errors.is_empty());
    assert!(errors.iter().all(|e| e.is_offset_out_of_range()));
    assert_eq!(payloads, vec!["other"]);
    assert!(consumer.cursors()[0].needs_resync());

    assert_eq!(consumer.resync_offsets().unwrap(), 1);
    assert_eq!(committed(&registry, 0), 20);
    assert_eq!(consumer.cursors()[0].committed_offset(), 20);
    assert!(!consumer.cursors()[0].needs_resync());

    // partition 1 was read but never committed, so it is delivered again
    consumer.rewind().unwrap();
    let payloads: Vec<String> = consumer.by_ref().map(|p| text(&p.unwrap())).collect();
    assert_eq!(payloads, vec!["message #2", "message #3", "other"]);
}

#[test]
fn test_resync_checks_idle_cursors() {
    let (_broker, registry) = two_partitions();
    registry.commit(GROUP, TOPIC, 0, 0, 10_000).unwrap();
    let mut consumer = consumer(&registry);

    consumer.rewind().unwrap();
    assert_eq!(consumer.resync_offsets().unwrap(), 1);
    assert_eq!(committed(&registry, 0), 0);

    // checking the healthy partition delivers nothing and counts nothing
    assert_eq!(consumer.read_bytes(), 0);
    assert!(!consumer.cursors()[1].is_draining());
    assert_eq!(consumer.cursors()[1].in_flight_bytes(), 0);

    let payloads: Vec<String> = consumer.by_ref().map(|p| text(&p.unwrap())).collect();
    assert_eq!(payloads, vec!["message #1", "message #2", "message #3", "other"]);
}

#[test]
fn test_commit_after_resync_keeps_undelivered_messages() {
    let (_broker, registry) = two_partitions();
    registry.commit(GROUP, TOPIC, 0, 0, 10_000).unwrap();
    let mut consumer = consumer(&registry);

    consumer.rewind().unwrap();
    assert_eq!(consumer.resync_offsets().unwrap(), 1);
    consumer.commit_offsets().unwrap();
    assert_eq!(committed(&registry, 0), 0);
    assert_eq!(committed(&registry, 1), 0);
    consumer.close();

    let mut fresh = self::consumer(&registry);
    let payloads: Vec<String> = fresh.by_ref().map(|p| text(&p.unwrap())).collect();
    assert_eq!(payloads, vec!["message #1", "message #2", "message #3", "other"]);
}

#[test]
fn test_remaining_size() {
    let (_broker, registry) = two_partitions();
    registry.commit(GROUP, TOPIC, 0, 0, 20).unwrap();
    let mut consumer = consumer(&registry);

    assert_eq!(consumer.remaining_size().unwrap(), 40 + 15);

    assert_eq!(consumer.by_ref().filter(Result::is_ok).count(), 3);
    assert_eq!(consumer.remaining_size().unwrap(), 0);
}

#[test]
fn test_unreachable_broker_reports_once() {
    init_tracing();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let registry = Arc::new(MemoryRegistry::new());
    registry
        .register_broker(0, "gone", "127.0.0.1", port)
        .unwrap();
    registry.register_topic(TOPIC, 0, 1).unwrap();
    let mut consumer = consumer(&registry);

    assert!(matches!(
        consumer.next(),
        Some(Err(KafkaClientError::Connection { .. }))
    ));
    assert!(consumer.next().is_none());
    assert!(consumer.cursors()[0].is_failed());
    assert!(!consumer.cursors()[0].needs_resync());

    // nothing read, nothing to commit
    consumer.commit_offsets().unwrap();
    assert_eq!(committed(&registry, 0), 0);
}
