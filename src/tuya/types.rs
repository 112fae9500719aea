//! Tuya protocol types and constants.

// Frame delimiters
pub(crate) const PREFIX: [u8; 4] = [0x00, 0x00, 0x55, 0xAA];
pub(crate) const SUFFIX: [u8; 4] = [0x00, 0x00, 0xAA, 0x55];

// Protocol constants
pub(crate) const HEADER_SIZE: usize = 16; // prefix(4) + sequence(4) + command(4) + length(4)
pub(crate) const TRAILER_SIZE: usize = 8; // checksum(4) + suffix(4)
pub(crate) const RETURN_CODE_SIZE: usize = 4;
pub(crate) const MIN_FRAME_SIZE: usize = 24;
pub(crate) const VERSION_BLOCK_SIZE: usize = 15; // "3.3" + 12 spacer bytes
pub(crate) const V33_SPACER: [u8; 12] = [0; 12];
pub(crate) const V33_PAYLOAD_CORRECTION: usize = 12;
pub(crate) const SIGNATURE_LEN: usize = 16;
pub(crate) const READ_BUFFER_SIZE: usize = 1024;

/// Default TCP port of the device's local server.
pub const DEFAULT_PORT: u16 = 6668;

/// Command opcodes carried in the last byte of the header command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    SetStatus = 0x07,
    GetStatus = 0x0a,
    GetSsidList = 0x0b,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Wire protocol revision, fixed per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Plain frames, zero checksum, base64 + MD5-signed payloads.
    V31,
    /// CRC32 frames, raw AES payloads.
    V33,
}

impl ProtocolVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V31 => "3.1",
            Self::V33 => "3.3",
        }
    }

    /// Whether GetStatus requests must be encrypted.
    pub fn encrypts_queries(self) -> bool {
        matches!(self, Self::V33)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3.1" => Ok(Self::V31),
            "3.3" => Ok(Self::V33),
            other => Err(crate::error::AppError::UnsupportedVersion(other.to_string())),
        }
    }
}

/// How a response payload was turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Payload decrypted cleanly with the local key.
    Encrypted,
    /// Payload was plain text by format (3.1 unsigned replies).
    Plaintext,
    /// Decryption failed and the raw bytes were read as text instead.
    PlaintextFallback,
}

/// Text extracted from a response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub text: String,
    pub encoding: PayloadEncoding,
}

/// Fields read from a structurally valid frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub command: u8,
    /// Declared length: everything after the length field through the suffix.
    pub payload_len: usize,
}
