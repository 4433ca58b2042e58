use bytes::{Bytes, BytesMut};
use kafka_legacy_client::{
    protocol::{encode_compressed_message_set, encode_message_set},
    BufferSource, CompressionType, MessageSet,
};
use proptest::prelude::*;

/// A batch of payloads stored either as plain entries or as one gzip envelope
fn batches() -> impl Strategy<Value = Vec<(bool, Vec<Vec<u8>>)>> {
    let payload = proptest::collection::vec(any::<u8>(), 0..64);
    let batch = (any::<bool>(), proptest::collection::vec(payload, 1..5));
    proptest::collection::vec(batch, 0..6)
}

/// Encode every batch; returns the log and the byte length of each entry with its payloads
fn encode(batches: &[(bool, Vec<Vec<u8>>)]) -> (Bytes, Vec<(usize, Vec<Vec<u8>>)>) {
    let mut log = BytesMut::new();
    let mut entries = Vec::new();
    for (compressed, payloads) in batches {
        let plain = encode_message_set(payloads).unwrap();
        if *compressed {
            let envelope = encode_compressed_message_set(&plain, CompressionType::Gzip).unwrap();
            entries.push((envelope.len(), payloads.clone()));
            log.extend_from_slice(&envelope);
        } else {
            for payload in payloads {
                let entry = encode_message_set(&[payload]).unwrap();
                entries.push((entry.len(), vec![payload.clone()]));
            }
            log.extend_from_slice(&plain);
        }
    }
    (log.freeze(), entries)
}

fn read_all(log: Bytes) -> (Vec<Vec<u8>>, u64) {
    let mut set = MessageSet::new(BufferSource::new(log), 0);
    let payloads = set
        .by_ref()
        .map(|message| message.unwrap().payload().to_vec())
        .collect();
    (payloads, set.valid_bytes())
}

proptest! {
    #[test]
    fn prop_mixed_log_yields_every_payload(batches in batches()) {
        let (log, _) = encode(&batches);
        let expected: Vec<Vec<u8>> = batches
            .iter()
            .flat_map(|(_, payloads)| payloads.iter().cloned())
            .collect();

        let (payloads, valid_bytes) = read_all(log.clone());
        prop_assert_eq!(payloads, expected);
        prop_assert_eq!(valid_bytes, log.len() as u64);
    }

    #[test]
    fn prop_truncated_log_yields_whole_entries(batches in batches(), cut in any::<prop::sample::Index>()) {
        let (log, entries) = encode(&batches);
        let cut = if log.is_empty() { 0 } else { cut.index(log.len() + 1) };

        let mut whole_bytes = 0;
        let mut expected = Vec::new();
        for (len, payloads) in &entries {
            if whole_bytes + len > cut {
                break;
            }
            whole_bytes += len;
            expected.extend(payloads.iter().cloned());
        }

        let (payloads, valid_bytes) = read_all(log.slice(..cut));
        prop_assert_eq!(payloads, expected);
        prop_assert_eq!(valid_bytes, whole_bytes as u64);
    }
}
