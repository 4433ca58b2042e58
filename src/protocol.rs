//! Wire protocol: request frames, message encoding and response headers
//!
//! All integers are big-endian. Every request starts with the shared header
//!
//! ```text
//! <totalLen:4><requestType:2><topicLen:2><topic><partition:4>
//! ```
//!
//! where `totalLen` counts every byte after itself. Responses start with
//! `<totalLen:4><errorCode:2>` followed by the request-specific payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::compression::{self, CompressionType};
use crate::error::{ErrorCode, KafkaClientError};
use crate::transport::Transport;

/// Magic byte written by this client
pub const CURRENT_MAGIC_VALUE: u8 = 1;

/// Magic byte of the first message format, which has no compression attribute
pub const LEGACY_MAGIC_VALUE: u8 = 0;

/// Partition id asking the broker to choose a partition
pub const RANDOM_PARTITION: u32 = 0xFFFF_FFFF;

/// Offset-lookup sentinel for the most recent offset
pub const OFFSET_LATEST: i64 = -1;

/// Offset-lookup sentinel for the earliest available offset
pub const OFFSET_EARLIEST: i64 = -2;

/// Bytes before the payload of a current-format message
pub const MESSAGE_HEADER_SIZE: usize = 6;

/// Size of the length prefix framing every message-set entry
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Request type discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestType {
    Produce = 0,
    Fetch = 1,
    MultiFetch = 2,
    MultiProduce = 3,
    Offsets = 4,
}

impl From<RequestType> for u16 {
    fn from(request_type: RequestType) -> Self {
        request_type as u16
    }
}

/// Pack a 64-bit value as two big-endian 32-bit halves
pub fn pack_i64(value: i64) -> [u8; 8] {
    let bits = value as u64;
    let high = (bits >> 32) as u32;
    let low = (bits & 0xFFFF_FFFF) as u32;

    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&high.to_be_bytes());
    out[4..].copy_from_slice(&low.to_be_bytes());
    out
}

/// Rebuild a 64-bit value from two big-endian 32-bit halves
pub fn unpack_i64(bytes: &[u8]) -> Result<i64, KafkaClientError> {
    if bytes.len() < 8 {
        return Err(KafkaClientError::malformed(format!(
            "need 8 bytes for a 64-bit value, got {}",
            bytes.len()
        )));
    }
    let mut buf = &bytes[..8];
    let high = buf.get_u32() as u64;
    let low = buf.get_u32() as u64;
    Ok(((high << 32) | low) as i64)
}

/// Encode one message as `<magic:1><compression:1><crc32:4><payload>`
///
/// The checksum covers the payload exactly as stored, i.e. after compression.
pub fn encode_message(payload: &[u8], compression: CompressionType) -> Result<Bytes, KafkaClientError> {
    let compressed = compression::compress(payload, compression)?;

    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + compressed.len());
    buf.put_u8(CURRENT_MAGIC_VALUE);
    buf.put_u8(compression.into());
    buf.put_u32(crc32fast::hash(&compressed));
    buf.put_slice(&compressed);
    Ok(buf.freeze())
}

/// Frame already-encoded messages as `<len:4><message>` entries
pub fn frame_messages<I, M>(messages: I) -> Bytes
where
    I: IntoIterator<Item = M>,
    M: AsRef<[u8]>,
{
    let mut buf = BytesMut::new();
    for message in messages {
        let message = message.as_ref();
        buf.put_u32(message.len() as u32);
        buf.put_slice(message);
    }
    buf.freeze()
}

/// Encode payloads as an uncompressed message set
pub fn encode_message_set<P: AsRef<[u8]>>(payloads: &[P]) -> Result<Bytes, KafkaClientError> {
    let encoded = payloads
        .iter()
        .map(|payload| encode_message(payload.as_ref(), CompressionType::None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(frame_messages(encoded))
}

/// Wrap a whole message set in one compressed message entry
pub fn encode_compressed_message_set(
    message_set: &[u8],
    compression: CompressionType,
) -> Result<Bytes, KafkaClientError> {
    let envelope = encode_message(message_set, compression)?;
    Ok(frame_messages([envelope]))
}

fn check_topic(topic: &str) -> Result<(), KafkaClientError> {
    if topic.len() > i16::MAX as usize {
        return Err(KafkaClientError::invalid_config(format!(
            "topic name of {} bytes exceeds the {} byte limit",
            topic.len(),
            i16::MAX
        )));
    }
    Ok(())
}

/// Write the shared request header; `body_len` is the size of what follows it
pub fn encode_request_header(
    buf: &mut BytesMut,
    request_type: RequestType,
    topic: &str,
    partition: u32,
    body_len: usize,
) -> Result<(), KafkaClientError> {
    check_topic(topic)?;
    let total_len = 2 + 2 + topic.len() + 4 + body_len;
    if total_len > i32::MAX as usize {
        return Err(KafkaClientError::invalid_config(format!(
            "request of {} bytes is too large",
            total_len
        )));
    }

    buf.reserve(4 + total_len);
    buf.put_u32(total_len as u32);
    buf.put_u16(request_type.into());
    buf.put_u16(topic.len() as u16);
    buf.put_slice(topic.as_bytes());
    buf.put_u32(partition);
    Ok(())
}

/// Encode a complete produce frame
///
/// Messages are framed individually and uncompressed; with batch compression
/// the framed set is wrapped as a single compressed message one level up.
pub fn encode_produce_request<P: AsRef<[u8]>>(
    topic: &str,
    partition: u32,
    messages: &[P],
    compression: CompressionType,
) -> Result<Bytes, KafkaClientError> {
    let mut message_set = encode_message_set(messages)?;
    if compression != CompressionType::None {
        message_set = encode_compressed_message_set(&message_set, compression)?;
    }

    let mut buf = BytesMut::new();
    encode_request_header(
        &mut buf,
        RequestType::Produce,
        topic,
        partition,
        4 + message_set.len(),
    )?;
    buf.put_u32(message_set.len() as u32);
    buf.put_slice(&message_set);
    Ok(buf.freeze())
}

/// Map a response error code to a result
pub fn decode_error_code(code: i16) -> Result<(), KafkaClientError> {
    match ErrorCode::from_code(code) {
        None => Ok(()),
        Some(error_code) => Err(KafkaClientError::Protocol(error_code)),
    }
}

/// Fetch messages from one partition starting at a byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    pub max_size: u32,
}

impl FetchRequest {
    pub fn new<T: Into<String>>(topic: T, partition: u32, offset: i64, max_size: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            max_size,
        }
    }
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "topic:{}, part:{} offset:{} maxSize:{}",
            self.topic, self.partition, self.offset, self.max_size
        )
    }
}

/// Ask for the offsets before a timestamp (or a sentinel)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetRequest {
    pub topic: String,
    pub partition: u32,
    pub time: i64,
    pub max_offsets: u32,
}

impl OffsetRequest {
    pub fn new<T: Into<String>>(topic: T, partition: u32, time: i64, max_offsets: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            time,
            max_offsets,
        }
    }
}

/// Publish a batch of payloads to one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRequest {
    pub topic: String,
    pub partition: u32,
    pub messages: Vec<Bytes>,
    pub compression: CompressionType,
}

impl ProduceRequest {
    pub fn new<T: Into<String>>(
        topic: T,
        partition: u32,
        messages: Vec<Bytes>,
        compression: CompressionType,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            messages,
            compression,
        }
    }
}

/// Any request this client can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Fetch(FetchRequest),
    Produce(ProduceRequest),
    Offsets(OffsetRequest),
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Fetch(_) => RequestType::Fetch,
            Request::Produce(_) => RequestType::Produce,
            Request::Offsets(_) => RequestType::Offsets,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            Request::Fetch(req) => &req.topic,
            Request::Produce(req) => &req.topic,
            Request::Offsets(req) => &req.topic,
        }
    }

    pub fn partition(&self) -> u32 {
        match self {
            Request::Fetch(req) => req.partition,
            Request::Produce(req) => req.partition,
            Request::Offsets(req) => req.partition,
        }
    }

    /// Encode the complete frame, length prefix included
    pub fn encode(&self) -> Result<Bytes, KafkaClientError> {
        match self {
            Request::Fetch(req) => {
                let mut buf = BytesMut::new();
                encode_request_header(&mut buf, RequestType::Fetch, &req.topic, req.partition, 12)?;
                buf.put_slice(&pack_i64(req.offset));
                buf.put_u32(req.max_size);
                Ok(buf.freeze())
            }
            Request::Offsets(req) => {
                let mut buf = BytesMut::new();
                encode_request_header(&mut buf, RequestType::Offsets, &req.topic, req.partition, 12)?;
                buf.put_slice(&pack_i64(req.time));
                buf.put_u32(req.max_offsets);
                Ok(buf.freeze())
            }
            Request::Produce(req) => {
                encode_produce_request(&req.topic, req.partition, &req.messages, req.compression)
            }
        }
    }

    /// Bytes after the request type field
    pub fn size_in_bytes(&self) -> Result<usize, KafkaClientError> {
        Ok(self.encode()?.len() - 6)
    }

    /// Encode and write the frame in one piece
    pub fn write_to(&self, transport: &mut Transport) -> Result<usize, KafkaClientError> {
        let frame = self.encode()?;
        transport.write(&frame)
    }
}

impl From<FetchRequest> for Request {
    fn from(req: FetchRequest) -> Self {
        Request::Fetch(req)
    }
}

impl From<OffsetRequest> for Request {
    fn from(req: OffsetRequest) -> Self {
        Request::Offsets(req)
    }
}

impl From<ProduceRequest> for Request {
    fn from(req: ProduceRequest) -> Self {
        Request::Produce(req)
    }
}

/// `<totalLen:4><errorCode:2>` at the start of every response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Bytes after the length field, error code included
    pub size: u32,
    pub error_code: i16,
}

impl ResponseHeader {
    pub fn read_from(transport: &mut Transport) -> Result<Self, KafkaClientError> {
        let mut size_bytes = transport.read_exact(4)?;
        let size = size_bytes.get_i32();
        if size <= 0 {
            return Err(KafkaClientError::malformed(format!(
                "{} is not a valid response size",
                size
            )));
        }
        if size < 2 {
            return Err(KafkaClientError::malformed(format!(
                "response of {} bytes cannot hold an error code",
                size
            )));
        }
        let mut code_bytes = transport.read_exact(2)?;
        Ok(Self {
            size: size as u32,
            error_code: code_bytes.get_i16(),
        })
    }

    /// Bytes of payload following the error code
    pub fn body_len(&self) -> usize {
        self.size as usize - 2
    }

    /// Whether the response carries no payload at all
    pub fn is_empty(&self) -> bool {
        self.size == 2
    }

    pub fn check(&self) -> Result<(), KafkaClientError> {
        decode_error_code(self.error_code)
    }
}

/// Read the payload announced by `header` and decode it as an offset list
pub fn read_offsets(
    transport: &mut Transport,
    header: &ResponseHeader,
) -> Result<Vec<i64>, KafkaClientError> {
    let body = transport.read_exact(header.body_len())?;
    decode_offsets(body)
}

/// Decode an offset-lookup payload: `count:4, offset:8 × count`
pub fn decode_offsets(mut body: Bytes) -> Result<Vec<i64>, KafkaClientError> {
    if body.remaining() < 4 {
        return Err(KafkaClientError::malformed("offset response too short"));
    }
    let count = body.get_i32();
    if count < 0 {
        return Err(KafkaClientError::malformed(format!(
            "{} is not a valid number of offsets",
            count
        )));
    }
    let count = count as usize;
    if body.remaining() < count * 8 {
        return Err(KafkaClientError::malformed(format!(
            "offset response announces {} offsets but carries {} bytes",
            count,
            body.remaining()
        )));
    }

    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(unpack_i64(&body[..8])?);
        body.advance(8);
    }
    Ok(offsets)
}
