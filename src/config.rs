//! Client configuration.
//!
//! [`ClientConfig`] is built from defaults, then an optional JSON override
//! file, then command-line flags. It is passed explicitly to the
//! [`Supervisor`](crate::supervisor::Supervisor) and every
//! [`Connection`](crate::client::Connection) it opens.
//!
//! Override file keys are snake_case and durations are milliseconds:
//!
//! ```json
//! { "host": "broker.internal", "port": 61613, "heartbeat_send_ms": 5000 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, StompError};
use crate::protocol::{Version, DEFAULT_MAX_FRAME_SIZE};
use crate::subscription::AckMode;
use crate::transport::broker_addr;
use crate::writer::WriterConfig;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 61613;
pub const DEFAULT_DESTINATION: &str = "/topic/fedora";

/// Capacity of each subscription's message queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_HEARTBEAT_SEND: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_RECEIVE: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_ERROR_MARGIN: Duration = Duration::from_secs(10);

/// Heart-beat intervals advertised in CONNECT.
///
/// Zero disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often we offer to send.
    pub send: Duration,
    /// How often we want to hear from the broker.
    pub receive: Duration,
    /// Slack added to the receive interval before declaring the broker dead.
    pub error_margin: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            send: DEFAULT_HEARTBEAT_SEND,
            receive: DEFAULT_HEARTBEAT_RECEIVE,
            error_margin: DEFAULT_HEARTBEAT_ERROR_MARGIN,
        }
    }
}

/// Delay between reconnect attempts. Never gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same delay before every attempt.
    Fixed(Duration),
    /// Doubling delay starting at `initial`, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th consecutive failure (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed(delay) => delay,
            RetryPolicy::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed(DEFAULT_RETRY_DELAY)
    }
}

/// Everything needed to connect, subscribe and stay subscribed.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub destination: String,
    pub ack_mode: AckMode,
    /// Versions offered in `accept-version`.
    pub versions: Vec<Version>,
    /// Value of the `host` header (virtual host); defaults to `host`.
    pub vhost: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub heartbeat: HeartbeatConfig,
    /// Bound on dial + handshake.
    pub connect_timeout: Duration,
    /// How long DISCONNECT waits for its RECEIPT.
    pub disconnect_timeout: Duration,
    pub queue_capacity: usize,
    pub max_frame_size: usize,
    pub writer: WriterConfig,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            destination: DEFAULT_DESTINATION.to_string(),
            ack_mode: AckMode::Client,
            versions: Version::ALL.to_vec(),
            vhost: None,
            login: None,
            passcode: None,
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            writer: WriterConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// `host:port` of the broker.
    pub fn addr(&self) -> String {
        broker_addr(&self.host, self.port)
    }

    /// Value for the CONNECT `host` header.
    pub fn virtual_host(&self) -> &str {
        self.vhost.as_deref().unwrap_or(&self.host)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn with_heartbeat(mut self, send: Duration, receive: Duration) -> Self {
        self.heartbeat.send = send;
        self.heartbeat.receive = receive;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Reject values that would make the client misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(StompError::Config("host must not be empty".to_string()));
        }
        if self.destination.is_empty() {
            return Err(StompError::Config("destination must not be empty".to_string()));
        }
        if self.versions.is_empty() {
            return Err(StompError::Config(
                "at least one protocol version must be offered".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(StompError::Config("queue_capacity must be at least 1".to_string()));
        }
        if self.writer.channel_capacity == 0 {
            return Err(StompError::Config(
                "writer channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a JSON override file on top of this config.
    pub fn load_overrides(self, path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let overrides: ConfigOverride = serde_json::from_str(&raw)?;
        self.apply(overrides)
    }

    /// Apply already-parsed overrides.
    pub fn apply(mut self, overrides: ConfigOverride) -> Result<Self> {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(destination) = overrides.destination {
            self.destination = destination;
        }
        if let Some(ack_mode) = overrides.ack_mode {
            self.ack_mode = ack_mode.parse()?;
        }
        if let Some(versions) = overrides.versions {
            self.versions = versions
                .iter()
                .map(|v| {
                    Version::parse(v)
                        .ok_or_else(|| StompError::Config(format!("unknown version {:?}", v)))
                })
                .collect::<Result<_>>()?;
        }
        if overrides.vhost.is_some() {
            self.vhost = overrides.vhost;
        }
        if overrides.login.is_some() {
            self.login = overrides.login;
        }
        if overrides.passcode.is_some() {
            self.passcode = overrides.passcode;
        }
        if let Some(ms) = overrides.heartbeat_send_ms {
            self.heartbeat.send = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.heartbeat_receive_ms {
            self.heartbeat.receive = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.heartbeat_error_margin_ms {
            self.heartbeat.error_margin = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.connect_timeout_ms {
            self.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.disconnect_timeout_ms {
            self.disconnect_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = overrides.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(size) = overrides.max_frame_size {
            self.max_frame_size = size;
        }
        if let Some(capacity) = overrides.writer_channel_capacity {
            self.writer.channel_capacity = capacity;
        }
        self.retry = match (overrides.retry_delay_ms, overrides.retry_max_delay_ms) {
            (Some(initial), Some(max)) => RetryPolicy::Exponential {
                initial: Duration::from_millis(initial),
                max: Duration::from_millis(max),
            },
            (Some(delay), None) => RetryPolicy::Fixed(Duration::from_millis(delay)),
            (None, _) => self.retry,
        };

        self.validate()?;
        Ok(self)
    }
}

/// Shape of the JSON override file. Every field is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ConfigOverride {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub destination: Option<String>,
    pub ack_mode: Option<String>,
    pub versions: Option<Vec<String>>,
    pub vhost: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub heartbeat_send_ms: Option<u64>,
    pub heartbeat_receive_ms: Option<u64>,
    pub heartbeat_error_margin_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub disconnect_timeout_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
    pub max_frame_size: Option<usize>,
    pub writer_channel_capacity: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    /// Switches to exponential backoff when set with `retry_delay_ms`.
    pub retry_max_delay_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.addr(), "localhost:61613");
        assert_eq!(config.destination, "/topic/fedora");
        assert_eq!(config.ack_mode, AckMode::Client);
        assert_eq!(config.heartbeat.send, Duration::from_secs(10));
        assert_eq!(config.heartbeat.receive, Duration::from_secs(30));
        assert_eq!(config.retry, RetryPolicy::Fixed(Duration::from_secs(1)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = ClientConfig::default()
            .with_host("broker")
            .with_port(1234)
            .with_destination("/queue/a")
            .with_ack_mode(AckMode::ClientIndividual)
            .with_heartbeat(Duration::ZERO, Duration::from_secs(5))
            .with_queue_capacity(4);

        assert_eq!(config.addr(), "broker:1234");
        assert_eq!(config.virtual_host(), "broker");
        assert_eq!(config.ack_mode, AckMode::ClientIndividual);
        assert_eq!(config.heartbeat.send, Duration::ZERO);
        assert_eq!(config.queue_capacity, 4);
    }

    #[test]
    fn test_fixed_retry_never_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1000), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_retry_capped() {
        let policy = RetryPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_secs(2));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_apply_overrides() {
        let overrides: ConfigOverride = serde_json::from_str(
            r#"{
                "host": "mq.example",
                "port": 6000,
                "ack_mode": "client-individual",
                "versions": ["1.1", "1.2"],
                "heartbeat_send_ms": 0,
                "retry_delay_ms": 250
            }"#,
        )
        .unwrap();

        let config = ClientConfig::default().apply(overrides).unwrap();

        assert_eq!(config.addr(), "mq.example:6000");
        assert_eq!(config.ack_mode, AckMode::ClientIndividual);
        assert_eq!(config.versions, vec![Version::V1_1, Version::V1_2]);
        assert_eq!(config.heartbeat.send, Duration::ZERO);
        assert_eq!(config.retry, RetryPolicy::Fixed(Duration::from_millis(250)));
    }

    #[test]
    fn test_apply_exponential_retry() {
        let overrides: ConfigOverride =
            serde_json::from_str(r#"{"retry_delay_ms": 100, "retry_max_delay_ms": 5000}"#)
                .unwrap();
        let config = ClientConfig::default().apply(overrides).unwrap();
        assert!(matches!(config.retry, RetryPolicy::Exponential { .. }));
    }

    #[test]
    fn test_unknown_override_key_rejected() {
        let result: std::result::Result<ConfigOverride, _> =
            serde_json::from_str(r#"{"hostname": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let overrides = ConfigOverride {
            queue_capacity: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            ClientConfig::default().apply(overrides),
            Err(StompError::Config(_))
        ));

        let overrides = ConfigOverride {
            ack_mode: Some("sometimes".to_string()),
            ..Default::default()
        };
        assert!(ClientConfig::default().apply(overrides).is_err());
    }

    #[test]
    fn test_load_overrides_missing_file() {
        let result = ClientConfig::default().load_overrides("/nonexistent/stompwire.json");
        assert!(matches!(result, Err(StompError::Io(_))));
    }
}
