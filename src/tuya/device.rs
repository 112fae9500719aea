//! Immutable device connection and credential record.

use super::types::{DEFAULT_PORT, ProtocolVersion};
use crate::error::{AppError, Result};

const LOCAL_KEY_LEN: usize = 16;

/// Endpoint and credentials of a single device.
///
/// Built once and never mutated; the protocol version is parsed at
/// construction so the codec only ever dispatches on [`ProtocolVersion`].
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    name: Option<String>,
    address: String,
    port: u16,
    version: ProtocolVersion,
    device_id: String,
    gateway_id: String,
    product_id: Option<String>,
    local_key: Vec<u8>,
}

impl DeviceIdentity {
    /// Create an identity with the default port and `gateway_id == device_id`.
    ///
    /// # Errors
    /// `UnsupportedVersion` for anything other than "3.1"/"3.3",
    /// `InvalidKey` when the local key is not 16 bytes.
    pub fn new(address: &str, version: &str, device_id: &str, local_key: &str) -> Result<Self> {
        let version: ProtocolVersion = version.parse()?;
        let local_key = local_key.as_bytes().to_vec();
        if local_key.len() != LOCAL_KEY_LEN {
            return Err(AppError::InvalidKey(local_key.len()));
        }

        Ok(Self {
            name: None,
            address: address.to_string(),
            port: DEFAULT_PORT,
            version,
            device_id: device_id.to_string(),
            gateway_id: device_id.to_string(),
            product_id: None,
            local_key,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_gateway_id(mut self, gateway_id: &str) -> Self {
        self.gateway_id = gateway_id.to_string();
        self
    }

    pub fn with_product_id(mut self, product_id: &str) -> Self {
        self.product_id = Some(product_id.to_string());
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `address:port` for socket connects and log lines.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn product_id(&self) -> Option<&str> {
        self.product_id.as_deref()
    }

    pub fn local_key(&self) -> &[u8] {
        &self.local_key
    }

    /// Label used in logs: the configured name, else the device id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let device = DeviceIdentity::new("192.168.0.106", "3.1", "abc123", "0123456789abcdef").unwrap();
        assert_eq!(device.port(), 6668);
        assert_eq!(device.gateway_id(), "abc123");
        assert_eq!(device.version(), ProtocolVersion::V31);
        assert_eq!(device.endpoint(), "192.168.0.106:6668");
        assert_eq!(device.label(), "abc123");
    }

    #[test]
    fn test_rejects_unknown_version() {
        let err = DeviceIdentity::new("10.0.0.2", "3.4", "abc123", "0123456789abcdef").unwrap_err();
        assert!(matches!(err, AppError::UnsupportedVersion(v) if v == "3.4"));
    }

    #[test]
    fn test_rejects_short_key() {
        let err = DeviceIdentity::new("10.0.0.2", "3.3", "abc123", "short").unwrap_err();
        assert!(matches!(err, AppError::InvalidKey(5)));
    }

    #[test]
    fn test_builder_overrides() {
        let device = DeviceIdentity::new("10.0.0.2", "3.3", "abc123", "0123456789abcdef")
            .unwrap()
            .with_port(7000)
            .with_gateway_id("gw1")
            .with_product_id("prod")
            .with_name("Lounge");
        assert_eq!(device.endpoint(), "10.0.0.2:7000");
        assert_eq!(device.gateway_id(), "gw1");
        assert_eq!(device.product_id(), Some("prod"));
        assert_eq!(device.label(), "Lounge");
    }
}
