//! Socket I/O: connect with retry, one request/response exchange per connection.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::device::DeviceIdentity;
use super::types::READ_BUFFER_SIZE;
use crate::error::{AppError, Result};

/// Reconnect policy for a single call.
///
/// With no `max_attempts`, no `deadline` and a token that is never cancelled
/// a call keeps retrying until the device answers.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff.
    pub max_backoff: Duration,
    /// Per-attempt TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Timeout for the single response read.
    pub read_timeout: Option<Duration>,
    /// Total connection attempts per call before giving up. A failed
    /// connect and a failed round trip each use one.
    pub max_attempts: Option<u32>,
    /// Bound on the whole call, retries included.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: Some(Duration::from_secs(10)),
            max_attempts: None,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1` (attempts count from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// Open a TCP connection, retrying with backoff until it succeeds, the
/// attempt budget runs out or the token is cancelled.
///
/// `attempt` is the call-wide counter; every connect try advances it.
pub(crate) async fn connect(
    device: &DeviceIdentity,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    attempt: &mut u32,
) -> Result<TcpStream> {
    let addr = device.endpoint();

    loop {
        *attempt += 1;
        let current = *attempt;
        debug!("TCP connecting to {addr} (attempt {current})");

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            result = connect_once(&addr, policy.connect_timeout) => result,
        };

        match result {
            Ok(stream) => {
                if current > 1 {
                    info!("Connected to {addr} after {current} attempts");
                }
                return Ok(stream);
            }
            Err(e) if policy.exhausted(current) => {
                return Err(AppError::ConnectionFailed(format!(
                    "{addr}: giving up after {current} attempts: {e}"
                )));
            }
            Err(e) => {
                let delay = policy.backoff(current);
                warn!("Connect to {addr} failed: {e}, retrying in {delay:?}");
                wait(delay, cancel).await?;
            }
        }
    }
}

async fn connect_once(addr: &str, connect_timeout: Option<Duration>) -> Result<TcpStream> {
    let stream = match connect_timeout {
        Some(limit) => timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| AppError::DeviceTimeout(format!("Connection timeout to {addr}")))??,
        None => TcpStream::connect(addr).await?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Write one frame and issue exactly one read for the response.
///
/// Returns whatever the single read delivered, possibly a short or empty
/// buffer; frame validation is left to the codec.
pub(crate) async fn round_trip(stream: &mut TcpStream, frame: &[u8], read_timeout: Option<Duration>) -> Result<Vec<u8>> {
    debug!("TX ({} bytes): {:02X?}", frame.len(), &frame[..frame.len().min(32)]);
    stream.write_all(frame).await?;
    stream.flush().await?;

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let read = match read_timeout {
        Some(limit) => timeout(limit, stream.read(&mut buffer))
            .await
            .map_err(|_| AppError::DeviceTimeout("Read timeout".to_string()))??,
        None => stream.read(&mut buffer).await?,
    };
    buffer.truncate(read);

    debug!("RX ({read} bytes): {:02X?}", &buffer[..read.min(32)]);
    Ok(buffer)
}

/// Connect, exchange one frame, close.
///
/// A failed round trip is retried from a fresh connection under the same
/// policy; the overall deadline bounds connects, waits and reads together.
pub(crate) async fn exchange(
    device: &DeviceIdentity,
    frame: &[u8],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    match policy.deadline {
        Some(limit) => timeout(limit, exchange_with_retry(device, frame, policy, cancel))
            .await
            .map_err(|_| AppError::DeviceTimeout(format!("{} did not answer within {limit:?}", device.endpoint())))?,
        None => exchange_with_retry(device, frame, policy, cancel).await,
    }
}

async fn exchange_with_retry(
    device: &DeviceIdentity,
    frame: &[u8],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut attempt = 0u32;

    loop {
        let mut stream = connect(device, policy, cancel, &mut attempt).await?;

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            result = round_trip(&mut stream, frame, policy.read_timeout) => result,
        };
        // Connection is never reused
        drop(stream);

        match result {
            Ok(response) => return Ok(response),
            Err(e) if policy.exhausted(attempt) => return Err(e),
            Err(e) => {
                let delay = policy.backoff(attempt);
                warn!("Round trip with {} failed: {e}, retrying in {delay:?}", device.endpoint());
                wait(delay, cancel).await?;
            }
        }
    }
}

async fn wait(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_default_policy_is_unbounded() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(1_000_000));
        assert!(policy.deadline.is_none());
    }

    #[test]
    fn test_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[tokio::test]
    async fn test_connect_continues_call_attempt_count() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let device = DeviceIdentity::new("127.0.0.1", "3.3", "abc123", "0123456789abcdef")
            .unwrap()
            .with_port(port);
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };

        // Two attempts already spent by the call, one left
        let mut attempt = 2;
        let err = connect(&device, &policy, &CancellationToken::new(), &mut attempt)
            .await
            .unwrap_err();
        assert_eq!(attempt, 3);
        assert!(matches!(&err, AppError::ConnectionFailed(msg) if msg.contains("after 3 attempts")), "{err}");
    }
}
