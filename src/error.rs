//! Error types for the tinytelemetry protocol and collector.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Protocol-level errors raised while encoding or decoding frames.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer than 12 bytes were available for the header
    #[error("malformed header: {0} bytes, expected at least 12")]
    MalformedHeader(usize),
    /// Header carries a protocol version other than 1
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    /// Message type byte is neither DATA nor HEARTBEAT
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    /// Device identifier 0 is reserved
    #[error("invalid device id {0}")]
    InvalidDeviceId(u16),
    /// DATA frame with no readings
    #[error("DATA frame must carry at least one reading")]
    EmptyBatch,
    /// More readings than fit in a single frame
    #[error("too many readings: {0}, max is 37")]
    BatchTooLarge(usize),
    /// Encoded frame would exceed the 200 byte limit
    #[error("frame too large: {0} bytes, max is 200")]
    FrameTooLarge(usize),
    /// Payload shorter than its reading count requires
    #[error("truncated payload: {actual} bytes, expected {expected}")]
    TruncatedPayload {
        /// Bytes required by the count byte
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },
}

impl ProtocolError {
    /// Short, stable label used for drop metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MalformedHeader(_) => "malformed_header",
            Self::UnsupportedVersion(_) => "unsupported_version",
            Self::UnknownMessageType(_) => "unknown_message_type",
            Self::InvalidDeviceId(_) => "invalid_device_id",
            Self::EmptyBatch => "empty_batch",
            Self::BatchTooLarge(_) => "batch_too_large",
            Self::FrameTooLarge(_) => "frame_too_large",
            Self::TruncatedPayload { .. } => "truncated_payload",
        }
    }
}

/// Invalid collector or producer configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Device identifier outside 1..=65535
    #[error("device id must be between 1 and 65535, got {0}")]
    DeviceId(u32),
    /// Reporting interval not one of the supported values
    #[error("interval must be one of 1, 5 or 30 seconds, got {0}")]
    Interval(u64),
    /// Batch size outside 1..=37
    #[error("batch size must be between 1 and 37, got {0}")]
    BatchSize(usize),
    /// Unrecognised sensor type name
    #[error("unknown sensor type: {0}")]
    SensorType(String),
    /// No sensor types selected
    #[error("at least one sensor type is required")]
    NoSensorTypes,
    /// Reorder window of zero
    #[error("reorder window must be at least 1")]
    ReorderWindow,
    /// Bounded duplicate window outside 1..=1024
    #[error("dedup window must be between 1 and 1024, got {0}")]
    DedupWindow(u32),
}

/// Fatal collector errors. Raised before the receive loop starts, or when the
/// log sink can no longer be written.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Configuration rejected by validation
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// UDP socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying I/O error
        source: io::Error,
    },
    /// Log file could not be created
    #[error("failed to open log {}: {source}", path.display())]
    OpenLog {
        /// Path of the log file
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
    /// Write or flush to the log sink failed
    #[error("log sink error: {0}")]
    Sink(#[source] io::Error),
    /// Socket failure inside the receive loop
    #[error("socket error: {0}")]
    Socket(#[source] io::Error),
}

/// A persisted log row that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("bad log row: {reason}: {row:?}")]
pub struct RecordParseError {
    /// Offending row
    pub row: String,
    /// What was wrong with it
    pub reason: &'static str,
}

/// Sensor producer failures.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// Configuration rejected by validation
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Frame could not be encoded; it was not sent
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Collector address did not resolve
    #[error("cannot resolve {0}")]
    Resolve(String),
    /// Socket creation or send failed
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}
