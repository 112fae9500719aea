//! Payload encryption and signing.
//!
//! Both protocol versions use AES-128 in ECB mode with PKCS#7 padding, keyed
//! with the device's local key. Version 3.1 additionally base64-wraps the
//! ciphertext and prefixes it with a truncated MD5 signature; version 3.3
//! sends the raw ciphertext and relies on the frame CRC instead.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use tracing::debug;

use super::device::DeviceIdentity;
use super::types::{ProtocolVersion, SIGNATURE_LEN};
use crate::error::{AppError, Result};

const BLOCK_SIZE: usize = 16;

/// Encrypt a JSON command body for the device's protocol version.
///
/// - 3.1: `"3.1" + signature + base64(AES(json))` as UTF-8 bytes
/// - 3.3: `AES(json)`
pub fn encrypt_payload(json: &str, device: &DeviceIdentity) -> Result<Vec<u8>> {
    debug!("Encrypting {} byte payload for protocol {}", json.len(), device.version());
    let ciphertext = aes_ecb_encrypt(json.as_bytes(), device.local_key())?;

    match device.version() {
        ProtocolVersion::V31 => {
            let encoded = BASE64.encode(&ciphertext);
            let signature = sign_v31(&encoded, device.version(), device.local_key());
            Ok(format!("{}{signature}{encoded}", device.version()).into_bytes())
        }
        ProtocolVersion::V33 => Ok(ciphertext),
    }
}

/// Decrypt a raw AES-ECB payload into a UTF-8 string.
///
/// No signature is verified on inbound data.
pub fn decrypt_payload(data: &[u8], device: &DeviceIdentity) -> Result<String> {
    debug!("Decrypting {} byte payload", data.len());
    let plaintext = aes_ecb_decrypt(data, device.local_key())?;
    String::from_utf8(plaintext).map_err(|e| AppError::crypto(format!("Decrypted payload is not UTF-8: {e}")))
}

/// Decrypt a 3.1 reply in the outbound format (`"3.1" + signature + base64`).
pub fn decrypt_signed_text(text: &str, device: &DeviceIdentity) -> Result<String> {
    let version = device.version().as_str();
    let body = text
        .strip_prefix(version)
        .and_then(|rest| rest.get(SIGNATURE_LEN..))
        .ok_or_else(|| AppError::crypto("Signed payload too short"))?;
    let ciphertext = BASE64
        .decode(body.trim())
        .map_err(|e| AppError::crypto(format!("Invalid base64 payload: {e}")))?;
    decrypt_payload(&ciphertext, device)
}

/// Compute the 3.1 signature over a base64 ciphertext.
///
/// Lowercase hex MD5 of `data=<b64>||lpv=<version>||<key>`, characters 8..24.
pub fn sign_v31(encoded: &str, version: ProtocolVersion, local_key: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("data={encoded}||lpv={version}||").as_bytes());
    hasher.update(local_key);
    let digest = hex::encode(hasher.finalize());
    digest[8..8 + SIGNATURE_LEN].to_string()
}

fn new_cipher(key: &[u8]) -> Result<Aes128> {
    Aes128::new_from_slice(key).map_err(|_| AppError::InvalidKey(key.len()))
}

/// AES-128-ECB encrypt with PKCS#7 padding.
pub(crate) fn aes_ecb_encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let cipher = new_cipher(key)?;

    let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
    let mut output = Vec::with_capacity(plaintext.len() + pad);
    output.extend_from_slice(plaintext);
    output.resize(plaintext.len() + pad, pad as u8);

    for chunk in output.chunks_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }

    Ok(output)
}

/// AES-128-ECB decrypt and strip PKCS#7 padding.
pub(crate) fn aes_ecb_decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(AppError::crypto(format!(
            "Ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }

    let cipher = new_cipher(key)?;
    let mut output = ciphertext.to_vec();
    for chunk in output.chunks_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }

    let pad = output[output.len() - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE || output[output.len() - pad..].iter().any(|&b| b as usize != pad) {
        return Err(AppError::crypto("Invalid PKCS#7 padding"));
    }
    output.truncate(output.len() - pad);

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef";

    fn device(version: &str) -> DeviceIdentity {
        DeviceIdentity::new("127.0.0.1", version, "abc123", KEY).unwrap()
    }

    #[test]
    fn test_aes_known_answer() {
        // FIPS-197 appendix C.1
        let key: Vec<u8> = (0u8..16).collect();
        let plaintext = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let ciphertext = aes_ecb_encrypt(&plaintext, &key).unwrap();

        // Full block of plaintext gains a full block of padding
        assert_eq!(ciphertext.len(), 32);
        assert_eq!(hex::encode(&ciphertext[..16]), "69c4e0d86a7b0430d8cdb78070b4c55a");
        assert_eq!(aes_ecb_decrypt(&ciphertext, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_padding_lengths() {
        let key = KEY.as_bytes();
        for len in [0usize, 1, 15, 16, 17, 31] {
            let plaintext = vec![b'x'; len];
            let ciphertext = aes_ecb_encrypt(&plaintext, key).unwrap();
            assert_eq!(ciphertext.len(), (len / 16 + 1) * 16);
            assert_eq!(aes_ecb_decrypt(&ciphertext, key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_decrypt_rejects_partial_block() {
        let err = aes_ecb_decrypt(b"not a block", KEY.as_bytes()).unwrap_err();
        assert!(matches!(err, AppError::Crypto(_)));
    }

    #[test]
    fn test_decrypt_rejects_plain_json() {
        // plain JSON is not block aligned
        let dev = device("3.3");
        assert!(decrypt_payload(b"{\"dps\":{\"1\":1}}", &dev).is_err());
    }

    #[test]
    fn test_v33_payload_is_raw_ciphertext() {
        let dev = device("3.3");
        let json = r#"{"dps":{"1":true}}"#;
        let encrypted = encrypt_payload(json, &dev).unwrap();
        assert_eq!(encrypted, aes_ecb_encrypt(json.as_bytes(), KEY.as_bytes()).unwrap());
        assert_eq!(decrypt_payload(&encrypted, &dev).unwrap(), json);
    }

    #[test]
    fn test_v31_payload_layout() {
        let dev = device("3.1");
        let json = r#"{"dps":{"1":false}}"#;
        let encrypted = String::from_utf8(encrypt_payload(json, &dev).unwrap()).unwrap();

        assert!(encrypted.starts_with("3.1"));
        let signature = &encrypted[3..19];
        let encoded = &encrypted[19..];
        assert_eq!(signature, sign_v31(encoded, ProtocolVersion::V31, KEY.as_bytes()));
        assert_eq!(BASE64.decode(encoded).unwrap(), aes_ecb_encrypt(json.as_bytes(), KEY.as_bytes()).unwrap());

        assert_eq!(decrypt_signed_text(&encrypted, &dev).unwrap(), json);
    }

    #[test]
    fn test_signature_matches_md5_slice() {
        let mut hasher = Md5::new();
        hasher.update(b"data=QUJD||lpv=3.1||0123456789abcdef");
        let full = hex::encode(hasher.finalize());

        let signature = sign_v31("QUJD", ProtocolVersion::V31, KEY.as_bytes());
        assert_eq!(signature.len(), 16);
        assert_eq!(signature, &full[8..24]);
        assert!(signature.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_signature_sensitivity() {
        let base = sign_v31("QUJD", ProtocolVersion::V31, KEY.as_bytes());
        assert_eq!(base, sign_v31("QUJD", ProtocolVersion::V31, KEY.as_bytes()));
        assert_ne!(base, sign_v31("QUJE", ProtocolVersion::V31, KEY.as_bytes()));
        assert_ne!(base, sign_v31("QUJD", ProtocolVersion::V33, KEY.as_bytes()));
        assert_ne!(base, sign_v31("QUJD", ProtocolVersion::V31, b"fedcba9876543210"));
    }

    #[test]
    fn test_signed_text_too_short() {
        let dev = device("3.1");
        assert!(decrypt_signed_text("3.1abc", &dev).is_err());
    }
}
