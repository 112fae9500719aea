//! TuyaClient struct and public API.

use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cipher::encrypt_payload;
use super::device::DeviceIdentity;
use super::io::{RetryPolicy, exchange};
use super::protocol::{decode_frame, encode_frame};
use super::types::{Command, PayloadEncoding};
use crate::error::{AppError, Result};

/// Data points: string-encoded integer keys to opaque values.
pub type Dps = Map<String, Value>;

/// GetStatus request body.
#[derive(Debug, Serialize)]
struct StatusQuery<'a> {
    #[serde(rename = "gwId")]
    gw_id: &'a str,
    #[serde(rename = "devId")]
    dev_id: &'a str,
    t: i64,
    dps: Dps,
    uid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<bool>,
}

/// SetStatus request body.
#[derive(Debug, Serialize)]
struct StatusUpdate<'a> {
    #[serde(rename = "devId")]
    dev_id: &'a str,
    #[serde(rename = "gwId")]
    gw_id: &'a str,
    uid: &'a str,
    t: i64,
    dps: &'a Dps,
}

/// Local-network client for one device.
///
/// Holds no connection: every call connects, exchanges a single frame and
/// disconnects, so concurrent calls on a shared client are independent.
#[derive(Debug, Clone)]
pub struct TuyaClient {
    device: DeviceIdentity,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl TuyaClient {
    /// Create a client with the default retry policy.
    pub fn new(device: DeviceIdentity) -> Self {
        Self {
            device,
            policy: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Tie the client's calls to an external token; cancelling it aborts
    /// pending connects, backoff waits and reads.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Abort every in-flight and future call of this client.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Query current state.
    ///
    /// Returns the `dps` object, or the whole response when `schema` is set.
    ///
    /// # Errors
    /// Transport and frame errors, `Json` for an unparsable body and
    /// `Protocol` when the reply lacks `dps`.
    pub async fn get(&self, schema: bool) -> Result<Dps> {
        let query = StatusQuery {
            gw_id: self.device.gateway_id(),
            dev_id: self.device.device_id(),
            t: epoch_seconds(),
            dps: Dps::new(),
            uid: self.device.device_id(),
            schema: schema.then_some(true),
        };

        let encrypt = self.device.version().encrypts_queries();
        let mut response = self.send_json(Command::GetStatus, &query, encrypt).await?;

        if schema {
            return Ok(response);
        }

        match response.remove("dps") {
            Some(Value::Object(dps)) => {
                info!("{}: {} data points", self.device.label(), dps.len());
                Ok(dps)
            }
            Some(other) => Err(AppError::protocol(format!("`dps` is not an object: {other}"))),
            None => Err(AppError::protocol("Response has no `dps` field")),
        }
    }

    /// Write data points. Returns the device's reply, empty when it sent none.
    pub async fn set(&self, dps: &Dps) -> Result<Dps> {
        let update = StatusUpdate {
            dev_id: self.device.device_id(),
            gw_id: self.device.gateway_id(),
            uid: "",
            t: epoch_seconds(),
            dps,
        };

        let response = self.send_json(Command::SetStatus, &update, true).await?;
        info!("{}: set {} data points", self.device.label(), dps.len());
        Ok(response)
    }

    /// Serialize, optionally encrypt, frame and send a command; parse the reply.
    pub async fn send_json<T: Serialize>(&self, command: Command, body: &T, encrypt: bool) -> Result<Map<String, Value>> {
        let json = serde_json::to_string(body)?;
        debug!("{:?} -> {}: {json}", command, self.device.label());

        let data = if encrypt {
            encrypt_payload(&json, &self.device)?
        } else {
            json.into_bytes()
        };
        let frame = encode_frame(&data, command, self.device.version());

        let response = exchange(&self.device, &frame, &self.policy, &self.cancel).await?;
        let decoded = decode_frame(&response, &self.device)?;
        if decoded.encoding == PayloadEncoding::PlaintextFallback {
            warn!("{}: reply was not encrypted with the local key", self.device.label());
        }
        debug!("{} <- {:?}: {}", self.device.label(), decoded.encoding, decoded.text);

        parse_response(&decoded.text)
    }
}

/// Parse a reply body; empty or single-character bodies mean "no data".
pub(crate) fn parse_response(text: &str) -> Result<Map<String, Value>> {
    let text = text.trim_matches(char::from(0)).trim();
    if text.len() <= 1 {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::protocol(format!("Expected a JSON object, got {other}"))),
    }
}

fn epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
impl TuyaClient {
    /// Request body of a SetStatus call with a fixed timestamp.
    pub(crate) fn set_body_for_test(&self, dps: &Dps, t: i64) -> String {
        let update = StatusUpdate {
            dev_id: self.device.device_id(),
            gw_id: self.device.gateway_id(),
            uid: "",
            t,
            dps,
        };
        serde_json::to_string(&update).unwrap()
    }
}
