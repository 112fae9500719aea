//! Tuya local-network protocol client (TCP port 6668).
//!
//! Implements the 3.1 and 3.3 framing, the AES-ECB payload scheme and a
//! one-connection-per-command transport.
//!
//! # Example
//!
//! ```ignore
//! use tuya_lan::tuya::{DeviceIdentity, TuyaClient};
//!
//! let device = DeviceIdentity::new("192.168.0.106", "3.3", "58205000840d8e46ebb0", "c914fffc4755fc93")?;
//! let client = TuyaClient::new(device);
//! let dps = client.get(false).await?;
//! ```

mod cipher;
mod client;
mod device;
mod io;
mod protocol;
mod types;


// Re-export public API
pub use cipher::{decrypt_payload, decrypt_signed_text, encrypt_payload, sign_v31};
pub use client::{Dps, TuyaClient};
pub use device::DeviceIdentity;
pub use io::RetryPolicy;
pub use protocol::{decode_frame, encode_frame};
pub use types::{Command, DEFAULT_PORT, DecodedPayload, PayloadEncoding, ProtocolVersion};
