//! Blocking byte transport with exact-length framing
//!
//! A [`Transport`] owns at most one live byte stream. Reads and writes loop
//! over partial I/O until the requested length is reached or a deadline
//! passes; any failure closes the stream so no half-read frame survives.

use crate::config::{ConnectionConfig, Timeouts};
use crate::error::KafkaClientError;
use crate::metrics::global_metrics;
use bytes::Bytes;
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, warn};

/// Any bidirectional byte stream a transport can drive
pub trait ByteStream: Read + Write + Send {}

impl<T: Read + Write + Send> ByteStream for T {}

/// Exact-length reader/writer over a socket or any other byte stream
pub struct Transport {
    endpoint: Option<ConnectionConfig>,
    timeouts: Timeouts,
    stream: Option<Box<dyn ByteStream>>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.endpoint)
            .field("timeouts", &self.timeouts)
            .field("connected", &self.stream.is_some())
            .finish()
    }
}

/// Largest buffer growth step while reading
const READ_CHUNK_SIZE: usize = 64 * 1024;

enum ReadFailure {
    Timeout(usize),
    Closed(usize),
    Io(io::Error),
}

impl Transport {
    /// Create an unconnected transport for a broker endpoint
    pub fn new(endpoint: ConnectionConfig) -> Self {
        Self {
            timeouts: endpoint.timeouts,
            endpoint: Some(endpoint),
            stream: None,
        }
    }

    /// Wrap an already-open byte stream; such a transport cannot reconnect
    pub fn from_stream<S: ByteStream + 'static>(stream: S) -> Self {
        Self {
            endpoint: None,
            timeouts: Timeouts::default(),
            stream: Some(Box::new(stream)),
        }
    }

    /// Adopt an already-open stream to `endpoint`; once that stream fails,
    /// reconnecting opens a fresh socket to the endpoint
    pub fn with_stream<S: ByteStream + 'static>(endpoint: ConnectionConfig, stream: S) -> Self {
        Self {
            timeouts: endpoint.timeouts,
            endpoint: Some(endpoint),
            stream: Some(Box::new(stream)),
        }
    }

    pub fn endpoint(&self) -> Option<&ConnectionConfig> {
        self.endpoint.as_ref()
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the connection; a no-op when already connected
    pub fn connect(&mut self) -> Result<(), KafkaClientError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| KafkaClientError::connection("Cannot reopen a closed stream"))?;

        if endpoint.host.is_empty() {
            return Err(KafkaClientError::connection("Cannot open null host"));
        }
        if endpoint.port <= 0 || endpoint.port > u16::MAX as i32 {
            return Err(KafkaClientError::connection(format!(
                "Cannot open without a valid port (got {})",
                endpoint.port
            )));
        }
        self.timeouts.validate()?;

        let address = endpoint.address();
        let stream = match Self::open(&endpoint.host, endpoint.port as u16, self.timeouts) {
            Ok(stream) => stream,
            Err(e) => {
                global_metrics().record_connection_failed();
                warn!("Could not connect to {}: {}", address, e);
                return Err(KafkaClientError::connection(format!(
                    "Could not connect to {} ({})",
                    address, e
                )));
            }
        };

        global_metrics().record_connection_created();
        debug!("Connected to {}", address);
        self.stream = Some(Box::new(stream));
        Ok(())
    }

    fn open(host: &str, port: u16, timeouts: Timeouts) -> io::Result<TcpStream> {
        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeouts.send) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeouts.recv))?;
                    stream.set_write_timeout(Some(timeouts.send))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(ErrorKind::NotFound, "host resolved to no addresses")
        }))
    }

    /// Drop the live stream; later reads and writes fail until `connect`
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closed transport {:?}", self.endpoint.as_ref().map(|e| e.address()));
        }
    }

    /// Read exactly `len` bytes
    pub fn read_exact(&mut self, len: usize) -> Result<Bytes, KafkaClientError> {
        self.read(len, true)
    }

    /// Read up to `len` bytes, accepting a short read at natural end of stream
    pub fn read_best_effort(&mut self, len: usize) -> Result<Bytes, KafkaClientError> {
        self.read(len, false)
    }

    fn read(&mut self, len: usize, verify_exact: bool) -> Result<Bytes, KafkaClientError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let timeout_ms = self.timeouts.recv.as_millis() as u64;
        let stream = self.stream.as_mut().ok_or_else(|| {
            KafkaClientError::connection(format!("Cannot read {} bytes: transport is not connected", len))
        })?;

        let mut buf = Vec::with_capacity(len.min(READ_CHUNK_SIZE));
        let filled = match Self::fill(stream.as_mut(), &mut buf, len) {
            Ok(filled) => filled,
            Err(failure) => {
                self.close();
                return Err(match failure {
                    ReadFailure::Timeout(filled) => KafkaClientError::timeout(
                        format!(
                            "Timed out reading {} bytes with {} bytes to go",
                            len,
                            len - filled
                        ),
                        timeout_ms,
                    ),
                    ReadFailure::Closed(filled) => KafkaClientError::end_of_stream(format!(
                        "Connection reset while reading {} bytes after {} bytes",
                        len, filled
                    )),
                    ReadFailure::Io(e) => KafkaClientError::Io(e),
                });
            }
        };

        if filled == 0 {
            self.close();
            return Err(KafkaClientError::end_of_stream(format!(
                "Could not read {} bytes from stream (no data)",
                len
            )));
        }
        if verify_exact && filled < len {
            self.close();
            return Err(KafkaClientError::end_of_stream(format!(
                "Read {} bytes instead of the requested {} bytes",
                filled, len
            )));
        }

        Ok(Bytes::from(buf))
    }

    /// Append up to `len` bytes to `buf`, growing it one chunk at a time so a
    /// bogus length from the peer cannot force a huge allocation up front
    fn fill(stream: &mut dyn ByteStream, buf: &mut Vec<u8>, len: usize) -> Result<usize, ReadFailure> {
        while buf.len() < len {
            let filled = buf.len();
            let chunk = (len - filled).min(READ_CHUNK_SIZE);
            buf.resize(filled + chunk, 0);
            let result = stream.read(&mut buf[filled..]);
            let read = match &result {
                Ok(n) => *n,
                Err(_) => 0,
            };
            buf.truncate(filled + read);
            match result {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => match e.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                        return Err(ReadFailure::Timeout(filled))
                    }
                    ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof => return Err(ReadFailure::Closed(filled)),
                    _ => return Err(ReadFailure::Io(e)),
                },
            }
        }
        Ok(buf.len())
    }

    /// Write every byte of `buf`, returning the number of bytes written
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, KafkaClientError> {
        let total = buf.len();
        let timeout_ms = self.timeouts.send.as_millis() as u64;
        let stream = self.stream.as_mut().ok_or_else(|| {
            KafkaClientError::connection(format!(
                "Cannot write {} bytes: transport is not connected",
                total
            ))
        })?;

        let mut written = 0;
        let mut failure = None;
        while written < total {
            match stream.write(&buf[written..]) {
                Ok(0) => {
                    failure = Some(KafkaClientError::BrokenPipe { written, total });
                    break;
                }
                Ok(n) => written += n,
                Err(e) => match e.kind() {
                    ErrorKind::Interrupted => continue,
                    ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                        failure = Some(KafkaClientError::timeout(
                            format!(
                                "Timed out writing {} bytes to stream after writing {} bytes",
                                total, written
                            ),
                            timeout_ms,
                        ));
                        break;
                    }
                    ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted => {
                        failure = Some(KafkaClientError::BrokenPipe { written, total });
                        break;
                    }
                    _ => {
                        failure = Some(KafkaClientError::Io(e));
                        break;
                    }
                },
            }
        }
        if failure.is_none() {
            if let Err(e) = stream.flush() {
                failure = Some(KafkaClientError::Io(e));
            }
        }

        if let Some(err) = failure {
            self.close();
            return Err(err);
        }
        Ok(written)
    }
}
