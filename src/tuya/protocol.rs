//! Tuya frame building, validation and payload extraction.
//!
//! Frame structure (all integers big-endian):
//! - Prefix (4 bytes): 00 00 55 aa
//! - Sequence (4 bytes): always zero
//! - Command (4 bytes): opcode in the last byte
//! - Length (4 bytes): bytes after this field through the suffix
//! - 3.3 SetStatus only: "3.3" + 12 zero bytes
//! - Data
//! - Checksum (4 bytes): zero for 3.1, CRC32 of everything before it for 3.3
//! - Suffix (4 bytes): 00 00 aa 55

use tracing::{debug, warn};

use super::cipher::{decrypt_payload, decrypt_signed_text};
use super::device::DeviceIdentity;
use super::types::{
    Command, DecodedPayload, FrameHeader, HEADER_SIZE, MIN_FRAME_SIZE, PREFIX, PayloadEncoding, ProtocolVersion,
    RETURN_CODE_SIZE, SUFFIX, TRAILER_SIZE, V33_PAYLOAD_CORRECTION, V33_SPACER, VERSION_BLOCK_SIZE,
};
use crate::error::{AppError, Result};

/// Build a request frame around already encoded data.
pub fn encode_frame(data: &[u8], command: Command, version: ProtocolVersion) -> Vec<u8> {
    let version_block = version == ProtocolVersion::V33 && command == Command::SetStatus;
    let payload_len = if version_block { VERSION_BLOCK_SIZE } else { 0 } + data.len() + TRAILER_SIZE;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload_len);

    // Header (prefix, sequence, command, payload length)
    frame.extend_from_slice(&PREFIX);
    frame.extend_from_slice(&[0, 0, 0, 0]);
    frame.extend_from_slice(&[0, 0, 0, command.code()]);
    frame.extend_from_slice(&(payload_len as u32).to_be_bytes());

    if version_block {
        frame.extend_from_slice(version.as_str().as_bytes());
        frame.extend_from_slice(&V33_SPACER);
    }

    frame.extend_from_slice(data);

    let checksum = match version {
        ProtocolVersion::V31 => 0,
        ProtocolVersion::V33 => crc32fast::hash(&frame),
    };
    frame.extend_from_slice(&checksum.to_be_bytes());
    frame.extend_from_slice(&SUFFIX);

    debug!(
        "Built {:?} frame: {} bytes, payload_len={payload_len}, checksum={checksum:#010x}",
        command,
        frame.len()
    );
    frame
}

/// Structural validation of a received frame.
pub(crate) fn validate_frame(frame: &[u8]) -> Result<FrameHeader> {
    if frame.is_empty() {
        return Err(AppError::malformed("Empty frame"));
    }
    if frame.len() < MIN_FRAME_SIZE {
        return Err(AppError::malformed(format!("Frame too short: {} bytes", frame.len())));
    }
    if frame[..4] != PREFIX {
        return Err(AppError::malformed(format!("Invalid prefix: {:02X?}", &frame[..4])));
    }
    if frame[frame.len() - 4..] != SUFFIX {
        return Err(AppError::malformed(format!("Invalid suffix: {:02X?}", &frame[frame.len() - 4..])));
    }

    let payload_len = u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]) as usize;
    let declared = HEADER_SIZE + payload_len;
    if declared > frame.len() {
        return Err(AppError::TruncatedFrame {
            declared,
            actual: frame.len(),
        });
    }

    Ok(FrameHeader {
        command: frame[11],
        payload_len,
    })
}

/// Compare the stored CRC32 of a 3.3 frame with its contents.
pub(crate) fn verify_checksum(frame: &[u8], header: &FrameHeader) -> Result<()> {
    let end = HEADER_SIZE + header.payload_len;
    if header.payload_len < TRAILER_SIZE {
        return Err(AppError::malformed(format!("Declared length {} too small", header.payload_len)));
    }
    let checksum_at = end - TRAILER_SIZE;

    let expected = crc32fast::hash(&frame[..checksum_at]);
    let found = u32::from_be_bytes([
        frame[checksum_at],
        frame[checksum_at + 1],
        frame[checksum_at + 2],
        frame[checksum_at + 3],
    ]);

    if expected != found {
        return Err(AppError::ChecksumMismatch { expected, found });
    }
    Ok(())
}

/// Validate a response frame and extract its text payload.
pub fn decode_frame(frame: &[u8], device: &DeviceIdentity) -> Result<DecodedPayload> {
    let header = validate_frame(frame)?;
    debug!(
        "Response frame: command={:#04x}, payload_len={}, {} bytes received",
        header.command,
        header.payload_len,
        frame.len()
    );

    match device.version() {
        ProtocolVersion::V31 => decode_v31(frame, device),
        ProtocolVersion::V33 => {
            verify_checksum(frame, &header)?;
            Ok(decode_v33(frame, device))
        }
    }
}

fn decode_v31(frame: &[u8], device: &DeviceIdentity) -> Result<DecodedPayload> {
    // Header off, checksum + suffix off, then the zero return code
    let data = &frame[HEADER_SIZE..frame.len() - TRAILER_SIZE];
    let start = data.iter().position(|&b| b != 0).unwrap_or(data.len());
    let text = String::from_utf8(data[start..].to_vec())
        .map_err(|e| AppError::malformed(format!("Payload is not UTF-8: {e}")))?;

    if text.starts_with(device.version().as_str()) {
        let json = decrypt_signed_text(&text, device)?;
        return Ok(DecodedPayload {
            text: json,
            encoding: PayloadEncoding::Encrypted,
        });
    }

    Ok(DecodedPayload {
        text,
        encoding: PayloadEncoding::Plaintext,
    })
}

fn decode_v33(frame: &[u8], device: &DeviceIdentity) -> DecodedPayload {
    // Work on the frame without prefix and suffix
    let body = &frame[PREFIX.len()..frame.len() - SUFFIX.len()];

    let payload_len = u32::from_be_bytes([body[8], body[9], body[10], body[11]]) as usize;
    let end = (HEADER_SIZE + payload_len)
        .saturating_sub(V33_PAYLOAD_CORRECTION)
        .min(body.len());

    // Replies carry a return code word whose upper bytes are zero; requests
    // (and some pushes) start the data right after the length field.
    let start = if body[12..15] == [0u8; 3] {
        let return_code = body[15];
        if return_code == 0 {
            HEADER_SIZE
        } else {
            debug!("Response return code {return_code:#04x}");
            HEADER_SIZE + RETURN_CODE_SIZE
        }
    } else {
        HEADER_SIZE - RETURN_CODE_SIZE
    };
    let mut payload = if start < end { &body[start..end] } else { &[][..] };

    if payload.len() >= VERSION_BLOCK_SIZE && payload.starts_with(device.version().as_str().as_bytes()) {
        payload = &payload[VERSION_BLOCK_SIZE..];
    }

    if payload.is_empty() {
        return DecodedPayload {
            text: String::new(),
            encoding: PayloadEncoding::Plaintext,
        };
    }

    match decrypt_payload(payload, device) {
        Ok(text) => DecodedPayload {
            text,
            encoding: PayloadEncoding::Encrypted,
        },
        Err(e) => {
            warn!(
                "Decrypt failed for {} ({e}), reading {} byte payload as plain text",
                device.label(),
                payload.len()
            );
            DecodedPayload {
                text: String::from_utf8_lossy(payload).into_owned(),
                encoding: PayloadEncoding::PlaintextFallback,
            }
        }
    }
}
