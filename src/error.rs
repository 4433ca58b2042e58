//! Error types for the legacy Kafka client library

use crate::compression::CompressionError;

/// Main error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum KafkaClientError {
    /// The transport could not be opened, or was used after being closed
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// A send or receive deadline passed with bytes outstanding
    #[error("{message} (timed out after {timeout_ms}ms)")]
    Timeout { message: String, timeout_ms: u64 },

    /// The peer closed the stream before the requested bytes arrived
    #[error("End of stream: {message}")]
    EndOfStream { message: String },

    /// The peer reset the connection during a write
    #[error("Connection broken while writing {total} bytes, completed only {written} bytes")]
    BrokenPipe { written: usize, total: usize },

    /// Other I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A declared size was not positive or a frame was shorter than its header
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    /// The requested feature is not implemented by this client
    #[error("Unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// Condition reported by the broker in a response header
    #[error("Protocol error: {0}")]
    Protocol(#[from] ErrorCode),

    /// A message whose stored checksum does not match its payload
    #[error("Corrupt message: stored crc {stored:#010x}, computed {computed:#010x}")]
    CorruptMessage { stored: u32, computed: u32 },

    /// Payload compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(CompressionError),

    /// Topic is not known to the topic registry
    #[error("Cannot find topic '{topic}'")]
    TopicNotFound { topic: String },

    /// The coordination registry could not answer or persist
    #[error("Registry error: {message}")]
    Registry { message: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl KafkaClientError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(message: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            message: message.into(),
            timeout_ms,
        }
    }

    /// Create an end-of-stream error
    pub fn end_of_stream<S: Into<String>>(message: S) -> Self {
        Self::EndOfStream {
            message: message.into(),
        }
    }

    /// Create a malformed frame error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Create an unsupported feature error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedFeature {
            message: message.into(),
        }
    }

    /// Create a registry error
    pub fn registry<S: Into<String>>(message: S) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Check if this error is retryable with a fresh connection
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::EndOfStream { .. } => true,
            Self::BrokenPipe { .. } => true,
            Self::Io(_) => true,
            Self::Registry { .. } => true,
            _ => false,
        }
    }

    /// Check if this error invalidated the transport it happened on
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::EndOfStream { .. }
                | Self::BrokenPipe { .. }
                | Self::Io(_)
        )
    }

    /// Check if the broker rejected the requested offset
    pub fn is_offset_out_of_range(&self) -> bool {
        matches!(self, Self::Protocol(ErrorCode::OffsetOutOfRange))
    }

    /// Check if this error is a premature end of stream
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream { .. })
    }

    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<CompressionError> for KafkaClientError {
    fn from(err: CompressionError) -> Self {
        match err {
            CompressionError::Unsupported(kind) => {
                Self::unsupported(format!("{} compression is not implemented", kind))
            }
            other => Self::Compression(other),
        }
    }
}

/// Error codes carried in the response header
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorCode {
    /// Requested offset is outside the partition's log
    #[error("offset out of range")]
    OffsetOutOfRange,
    /// Broker rejected a message
    #[error("invalid message")]
    InvalidMessage,
    /// Partition is not hosted by this broker
    #[error("wrong partition")]
    WrongPartition,
    /// Fetch size is invalid
    #[error("invalid fetch size")]
    InvalidFetchSize,
    /// Any other non-zero code
    #[error("unknown error code {0}")]
    Unknown(i16),
}

impl ErrorCode {
    /// Map a raw response code, `None` meaning success
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(ErrorCode::OffsetOutOfRange),
            2 => Some(ErrorCode::InvalidMessage),
            3 => Some(ErrorCode::WrongPartition),
            4 => Some(ErrorCode::InvalidFetchSize),
            other => Some(ErrorCode::Unknown(other)),
        }
    }

    /// Raw code as sent on the wire
    pub fn code(self) -> i16 {
        match self {
            ErrorCode::OffsetOutOfRange => 1,
            ErrorCode::InvalidMessage => 2,
            ErrorCode::WrongPartition => 3,
            ErrorCode::InvalidFetchSize => 4,
            ErrorCode::Unknown(code) => code,
        }
    }
}
