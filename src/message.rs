//! Messages and lazily decoded message sets
//!
//! A message set is a run of `<len:4><message>` entries read on demand from a
//! [`MessageSource`]. Messages whose compression attribute is not `none` are
//! envelopes: their decompressed payload is itself a message set, which is
//! iterated in place of the envelope.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::borrow::BorrowMut;
use std::fmt;
use tracing::debug;

use crate::compression::{self, CompressionType};
use crate::config::CrcPolicy;
use crate::error::KafkaClientError;
use crate::protocol::{LEGACY_MAGIC_VALUE, LENGTH_PREFIX_SIZE};
use crate::transport::Transport;

/// Chunk size used when discarding the unread rest of a response
const DRAIN_CHUNK_SIZE: usize = 64 * 1024;

/// A single decoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    magic: u8,
    compression: CompressionType,
    crc: u32,
    payload: Bytes,
}

impl Message {
    /// Decode the bytes of one message-set entry, length prefix excluded
    pub fn decode(data: Bytes) -> Result<Self, KafkaClientError> {
        let mut buf = data;
        if buf.is_empty() {
            return Err(KafkaClientError::malformed("empty message"));
        }
        let magic = buf.get_u8();

        let compression = if magic == LEGACY_MAGIC_VALUE {
            CompressionType::None
        } else {
            if buf.is_empty() {
                return Err(KafkaClientError::malformed("message too short for its attributes"));
            }
            CompressionType::try_from(buf.get_u8())?
        };

        if buf.remaining() < 4 {
            return Err(KafkaClientError::malformed("message too short for its checksum"));
        }
        let crc = buf.get_u32();

        Ok(Self {
            magic,
            compression,
            crc,
            payload: buf,
        })
    }

    pub fn magic(&self) -> u8 {
        self.magic
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Checksum stored with the message
    pub fn checksum(&self) -> u32 {
        self.crc
    }

    /// Payload exactly as stored on the wire
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Stored payload length
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Payload after undoing the message's compression
    pub fn decompressed_payload(&self) -> Result<Bytes, KafkaClientError> {
        match self.compression {
            CompressionType::None => Ok(self.payload.clone()),
            other => Ok(compression::decompress(&self.payload, other)?),
        }
    }

    /// Whether the stored checksum matches the stored payload
    pub fn is_valid(&self) -> bool {
        self.crc == crc32fast::hash(&self.payload)
    }

    pub fn verify(&self) -> Result<(), KafkaClientError> {
        let computed = crc32fast::hash(&self.payload);
        if computed != self.crc {
            return Err(KafkaClientError::CorruptMessage {
                stored: self.crc,
                computed,
            });
        }
        Ok(())
    }

    /// Wire encoding of this message, length prefix excluded
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6 + self.payload.len());
        buf.put_u8(self.magic);
        if self.magic != LEGACY_MAGIC_VALUE {
            buf.put_u8(self.compression.into());
        }
        buf.put_u32(self.crc);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = match self.compression {
            CompressionType::None => String::from_utf8_lossy(&self.payload).into_owned(),
            _ => "COMPRESSED-CONTENT".to_string(),
        };
        write!(
            f,
            "message(magic = {}, compression = {}, size = {}, crc = {}, valid = {}, payload = {})",
            self.magic,
            self.compression,
            self.size(),
            self.crc,
            self.is_valid(),
            payload
        )
    }
}

/// Anything a message set can pull exact-length chunks from
pub trait MessageSource {
    /// Read exactly `len` bytes; `EndOfStream` when fewer are available
    fn read_exact(&mut self, len: usize) -> Result<Bytes, KafkaClientError>;

    /// Called once the set reading this source is exhausted
    fn finish(&mut self) -> Result<(), KafkaClientError> {
        Ok(())
    }
}

impl MessageSource for Transport {
    fn read_exact(&mut self, len: usize) -> Result<Bytes, KafkaClientError> {
        Transport::read_exact(self, len)
    }
}

impl<S: MessageSource + ?Sized> MessageSource for &mut S {
    fn read_exact(&mut self, len: usize) -> Result<Bytes, KafkaClientError> {
        (**self).read_exact(len)
    }

    fn finish(&mut self) -> Result<(), KafkaClientError> {
        (**self).finish()
    }
}

/// In-memory source, used for decompressed envelopes
#[derive(Debug, Clone, Default)]
pub struct BufferSource {
    data: Bytes,
}

impl BufferSource {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

impl MessageSource for BufferSource {
    fn read_exact(&mut self, len: usize) -> Result<Bytes, KafkaClientError> {
        if len > self.data.len() {
            let available = self.data.len();
            self.data.clear();
            return Err(KafkaClientError::end_of_stream(format!(
                "buffer holds {} bytes, {} requested",
                available, len
            )));
        }
        Ok(self.data.split_to(len))
    }
}

/// One response body on a transport, bounded by its declared length
///
/// Reads never cross into the next response. Once the set over it is done
/// the unread remainder is drained so the transport stays aligned on frame
/// boundaries.
#[derive(Debug)]
pub struct ResponseBody<T> {
    transport: T,
    remaining: usize,
}

impl<T: BorrowMut<Transport>> ResponseBody<T> {
    pub fn new(transport: T, len: usize) -> Self {
        Self {
            transport,
            remaining: len,
        }
    }

    /// Bytes of this response not yet read
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Discard whatever is left of this response
    pub fn drain(&mut self) -> Result<(), KafkaClientError> {
        if self.remaining > 0 {
            debug!("Draining {} unread response bytes", self.remaining);
        }
        while self.remaining > 0 {
            let chunk = self.remaining.min(DRAIN_CHUNK_SIZE);
            if let Err(e) = self.transport.borrow_mut().read_exact(chunk) {
                self.remaining = 0;
                return Err(e);
            }
            self.remaining -= chunk;
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

impl<T: BorrowMut<Transport>> MessageSource for ResponseBody<T> {
    fn read_exact(&mut self, len: usize) -> Result<Bytes, KafkaClientError> {
        if len > self.remaining {
            let available = self.remaining;
            self.drain()?;
            return Err(KafkaClientError::end_of_stream(format!(
                "response body has {} bytes left, {} requested",
                available, len
            )));
        }
        match self.transport.borrow_mut().read_exact(len) {
            Ok(bytes) => {
                self.remaining -= len;
                Ok(bytes)
            }
            Err(e) => {
                self.remaining = 0;
                Err(e)
            }
        }
    }

    fn finish(&mut self) -> Result<(), KafkaClientError> {
        self.drain()
    }
}

enum SetState {
    NotStarted,
    Positioned(Message),
    Nested(Box<MessageSet<BufferSource>>),
    Exhausted,
}

/// Lazy, forward-only sequence of messages over a source
///
/// Call [`rewind`](Self::rewind) to load the first message, then
/// [`valid`](Self::valid) / [`current`](Self::current) /
/// [`advance`](Self::advance). The set is also an [`Iterator`] that rewinds
/// on first use.
pub struct MessageSet<S: MessageSource> {
    source: S,
    initial_offset: i64,
    valid_bytes: u64,
    crc_policy: CrcPolicy,
    state: SetState,
    yielded: bool,
}

impl<S: MessageSource> fmt::Debug for MessageSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            SetState::NotStarted => "not-started",
            SetState::Positioned(_) => "positioned",
            SetState::Nested(_) => "nested",
            SetState::Exhausted => "exhausted",
        };
        f.debug_struct("MessageSet")
            .field("initial_offset", &self.initial_offset)
            .field("valid_bytes", &self.valid_bytes)
            .field("crc_policy", &self.crc_policy)
            .field("state", &state)
            .finish()
    }
}

impl<S: MessageSource> MessageSet<S> {
    /// Create a set reading `source`, whose first entry sits at `initial_offset`
    pub fn new(source: S, initial_offset: i64) -> Self {
        Self {
            source,
            initial_offset,
            valid_bytes: 0,
            crc_policy: CrcPolicy::default(),
            state: SetState::NotStarted,
            yielded: false,
        }
    }

    pub fn with_crc_policy(mut self, crc_policy: CrcPolicy) -> Self {
        self.crc_policy = crc_policy;
        self
    }

    /// Create a set and load its first message
    pub fn open(source: S, initial_offset: i64) -> Result<Self, KafkaClientError> {
        let mut set = Self::new(source, initial_offset);
        set.rewind()?;
        Ok(set)
    }

    /// Byte offset of the first entry this set reads
    pub fn initial_offset(&self) -> i64 {
        self.initial_offset
    }

    /// Bytes of whole top-level entries read so far
    pub fn valid_bytes(&self) -> u64 {
        self.valid_bytes
    }

    /// Offset just past the last whole entry read
    pub fn next_offset(&self) -> i64 {
        self.initial_offset + self.valid_bytes as i64
    }

    /// Reset the byte counter and load the next message from the source
    ///
    /// The source is not rewound: a set over an already consumed stream is
    /// simply empty.
    pub fn rewind(&mut self) -> Result<(), KafkaClientError> {
        self.valid_bytes = 0;
        self.yielded = false;
        self.preload()
    }

    pub fn valid(&self) -> bool {
        matches!(self.state, SetState::Positioned(_) | SetState::Nested(_))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, SetState::Exhausted)
    }

    /// Message at the current position, if any
    pub fn current(&self) -> Option<&Message> {
        match &self.state {
            SetState::Positioned(message) => Some(message),
            SetState::Nested(child) => child.current(),
            SetState::NotStarted | SetState::Exhausted => None,
        }
    }

    /// Move to the next message
    pub fn advance(&mut self) -> Result<(), KafkaClientError> {
        if let SetState::Nested(child) = &mut self.state {
            if let Err(e) = child.advance() {
                self.exhaust();
                return Err(e);
            }
            if child.valid() {
                return Ok(());
            }
        }
        match self.state {
            SetState::Exhausted => Ok(()),
            _ => self.preload(),
        }
    }

    /// Give back the source, e.g. to reuse its transport
    pub fn into_source(self) -> S {
        self.source
    }

    fn exhaust(&mut self) {
        self.state = SetState::Exhausted;
        if let Err(e) = self.source.finish() {
            debug!("Could not release message source: {}", e);
        }
    }

    fn preload(&mut self) -> Result<(), KafkaClientError> {
        loop {
            let message = match self.read_message() {
                Ok(Some(message)) => message,
                Ok(None) => {
                    self.exhaust();
                    return Ok(());
                }
                Err(e) => {
                    self.exhaust();
                    return Err(e);
                }
            };

            if message.compression() == CompressionType::None {
                self.state = SetState::Positioned(message);
                return Ok(());
            }

            match self.open_envelope(&message) {
                Ok(Some(child)) => {
                    self.state = SetState::Nested(Box::new(child));
                    return Ok(());
                }
                // an envelope with nothing inside
                Ok(None) => continue,
                Err(e) => {
                    self.exhaust();
                    return Err(e);
                }
            }
        }
    }

    fn open_envelope(
        &self,
        message: &Message,
    ) -> Result<Option<MessageSet<BufferSource>>, KafkaClientError> {
        let inner = message.decompressed_payload()?;
        let mut child =
            MessageSet::new(BufferSource::new(inner), 0).with_crc_policy(self.crc_policy);
        child.rewind()?;
        Ok(child.valid().then_some(child))
    }

    /// Read one entry; `None` at natural end of the source
    fn read_message(&mut self) -> Result<Option<Message>, KafkaClientError> {
        let mut size_bytes = match self.source.read_exact(LENGTH_PREFIX_SIZE) {
            Ok(bytes) => bytes,
            Err(e) if e.is_end_of_stream() => return Ok(None),
            Err(e) => return Err(e),
        };
        let size = size_bytes.get_i32();
        if size <= 0 {
            debug!("{} is not a valid message size, ending message set", size);
            return Ok(None);
        }

        let data = match self.source.read_exact(size as usize) {
            Ok(bytes) => bytes,
            Err(e) if e.is_end_of_stream() => {
                debug!("Dropping truncated trailing message of {} bytes", size);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let message = Message::decode(data)?;
        // a corrupt entry is not counted, so the next fetch starts at it again
        if self.crc_policy == CrcPolicy::Verify {
            message.verify()?;
        }
        self.valid_bytes += (LENGTH_PREFIX_SIZE + size as usize) as u64;
        Ok(Some(message))
    }
}

impl<S: MessageSource> Iterator for MessageSet<S> {
    type Item = Result<Message, KafkaClientError>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = if matches!(self.state, SetState::NotStarted) {
            self.rewind()
        } else if self.yielded {
            self.advance()
        } else {
            Ok(())
        };
        if let Err(e) = step {
            return Some(Err(e));
        }

        let message = self.current()?.clone();
        self.yielded = true;
        Some(Ok(message))
    }
}
