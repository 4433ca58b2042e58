//! In-process broker speaking the legacy wire protocol, for integration tests
#![allow(dead_code)]

use bytes::{Buf, BufMut, BytesMut};
use kafka_legacy_client::MemoryRegistry;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const PRODUCE: u16 = 0;
const FETCH: u16 = 1;
const OFFSETS: u16 = 4;

#[derive(Default)]
struct BrokerState {
    logs: HashMap<(String, u32), Vec<u8>>,
    earliest: HashMap<(String, u32), i64>,
    requests: Vec<u16>,
}

/// Serves fetch, produce and offset requests from per-partition byte logs
pub struct MockBroker {
    port: u16,
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(BrokerState::default()));

        let shared = state.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = shared.clone();
                thread::spawn(move || serve(stream, state));
            }
        });

        Self { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Append raw message-set bytes to a partition log
    pub fn append(&self, topic: &str, partition: u32, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state
            .logs
            .entry((topic.to_string(), partition))
            .or_default()
            .extend_from_slice(bytes);
    }

    pub fn log(&self, topic: &str, partition: u32) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state
            .logs
            .get(&(topic.to_string(), partition))
            .cloned()
            .unwrap_or_default()
    }

    /// Offset reported as the earliest available one
    pub fn set_earliest(&self, topic: &str, partition: u32, offset: i64) {
        let mut state = self.state.lock().unwrap();
        state.earliest.insert((topic.to_string(), partition), offset);
    }

    /// Request types received so far, in arrival order
    pub fn requests(&self) -> Vec<u16> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Block until a partition log holds at least `len` bytes
    pub fn wait_for_log(&self, topic: &str, partition: u32, len: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let log = self.log(topic, partition);
            if log.len() >= len || Instant::now() > deadline {
                return log;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Registry publishing this broker as id 0 hosting `partitions` of `topic`
    pub fn registry(&self, topic: &str, partitions: u32) -> Arc<MemoryRegistry> {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .register_broker(0, "mock-broker", "127.0.0.1", self.port)
            .unwrap();
        registry.register_topic(topic, 0, partitions).unwrap();
        registry
    }
}

fn response(error_code: i16, body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(6 + body.len());
    buf.put_u32(2 + body.len() as u32);
    buf.put_i16(error_code);
    buf.put_slice(body);
    buf.to_vec()
}

fn serve(mut stream: TcpStream, state: Arc<Mutex<BrokerState>>) {
    loop {
        let mut len = [0u8; 4];
        if stream.read_exact(&mut len).is_err() {
            return;
        }
        let mut frame = vec![0u8; u32::from_be_bytes(len) as usize];
        if stream.read_exact(&mut frame).is_err() {
            return;
        }

        let mut buf = &frame[..];
        let request_type = buf.get_u16();
        let topic_len = buf.get_u16() as usize;
        let topic = String::from_utf8_lossy(&buf[..topic_len]).into_owned();
        buf.advance(topic_len);
        let partition = buf.get_u32();
        let key = (topic, partition);

        let reply = {
            let mut state = state.lock().unwrap();
            state.requests.push(request_type);
            match request_type {
                PRODUCE => {
                    let set_len = buf.get_u32() as usize;
                    state
                        .logs
                        .entry(key)
                        .or_default()
                        .extend_from_slice(&buf[..set_len]);
                    None
                }
                FETCH => {
                    let offset = buf.get_i64();
                    let max_size = buf.get_u32() as usize;
                    let log = state.logs.get(&key).map(Vec::as_slice).unwrap_or(&[]);
                    if offset < 0 || offset as usize > log.len() {
                        Some(response(1, &[]))
                    } else {
                        let start = offset as usize;
                        let end = log.len().min(start + max_size);
                        Some(response(0, &log[start..end]))
                    }
                }
                OFFSETS => {
                    let time = buf.get_i64();
                    let offset = if time == -2 {
                        state.earliest.get(&key).copied().unwrap_or(0)
                    } else {
                        state.logs.get(&key).map_or(0, Vec::len) as i64
                    };
                    let mut body = BytesMut::new();
                    body.put_u32(1);
                    body.put_i64(offset);
                    Some(response(0, &body))
                }
                _ => Some(response(-1, &[])),
            }
        };

        if let Some(reply) = reply {
            if stream.write_all(&reply).is_err() {
                return;
            }
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
