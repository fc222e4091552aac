//! Error types for the media streamer

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire format violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(i64),
}

/// Connection and socket errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("Short write: {0} bytes could not be written")]
    ShortWrite(usize),

    #[error("Session closed")]
    SessionClosed,

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// True when the peer went away cleanly between frames
    pub fn is_disconnect(&self) -> bool {
        matches!(self, NetworkError::ShortRead { received: 0, .. } | NetworkError::SessionClosed)
    }
}

/// Bounded queue signals
///
/// `Full` and `Empty` are ordinary control flow for non-blocking callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue full")]
    Full,

    #[error("Queue empty")]
    Empty,

    #[error("Queue closed")]
    Closed,
}

/// Codec boundary errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported codec: {0}")]
    Unsupported(String),

    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Capture boundary errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture source exhausted")]
    Exhausted,

    #[error("Capture failed: {0}")]
    Failed(String),
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
