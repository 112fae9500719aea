//! Error types and handling.

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// TCP connection could not be established within the retry budget
    #[error("TCP connection failed: {0}")]
    ConnectionFailed(String),

    /// Socket I/O failed mid round trip
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device communication timeout
    #[error("Device timeout: {0}")]
    DeviceTimeout(String),

    /// The call was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Response failed structural validation (size, prefix, suffix)
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Declared payload length exceeds the bytes received
    #[error("Truncated frame: declared {declared} bytes, got {actual}")]
    TruncatedFrame { declared: usize, actual: usize },

    /// CRC32 in a 3.3 frame does not match its contents
    #[error("Checksum mismatch: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch { expected: u32, found: u32 },

    /// Encryption or decryption failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Response body is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response is JSON but not the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Local key has the wrong length for AES-128
    #[error("Invalid local key: expected 16 bytes, got {0}")]
    InvalidKey(usize),

    /// Protocol version string is neither 3.1 nor 3.3
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Device profile has no data point for the requested operation
    #[error("Unsupported by device profile: {0}")]
    Unsupported(String),
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create a malformed frame error with message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create a protocol error with message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a crypto error with message
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// Create an unsupported-operation error with message
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Whether the failure happened before a usable response arrived.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::Io(_) | Self::DeviceTimeout(_) | Self::Cancelled
        )
    }
}
