use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

pub const DEFAULT_STREAM_HOST: &str = "stream-api.betfair.com";
pub const DEFAULT_STREAM_PORT: u16 = 443;

pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5000);

/// Canonical error surface shared across the stream client.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Session already established (connection id {connection_id})")]
    AlreadyConnected { connection_id: String },

    #[error("No session established")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Timeout: {context}")]
    Timeout { context: String },

    #[error("Connect gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Frame exceeds read buffer of {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("Correlation id {id} already has a pending call")]
    DuplicateCorrelationId { id: u32 },

    #[error("Session closed before a reply arrived")]
    SessionClosed,

    #[error("Server error: code={code:?}, message={message}")]
    ServerError {
        code: Option<String>,
        message: String,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Actor error: {0}")]
    ActorError(String),
}

impl StreamError {
    /// Whether the connect loop may spend a retry on this error.
    ///
    /// Establishment failures (dial, TLS handshake, waiting for the connection message, a
    /// session that died before it was established) are retryable. Misuse, cancellation,
    /// configuration and protocol errors are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionFailed(_)
                | StreamError::Tls(_)
                | StreamError::TransportError { .. }
                | StreamError::Timeout { .. }
                | StreamError::SessionClosed
                | StreamError::FrameTooLarge { .. }
        )
    }

    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            StreamError::AlreadyConnected { .. } | StreamError::NotConnected
        )
    }
}

/// TLS configuration for stream connections.
///
/// Safe-by-default: certificate validation is enabled unless explicitly disabled for test
/// emulators or controlled environments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTlsConfig {
    pub validate_certs: bool,
}

impl Default for StreamTlsConfig {
    fn default() -> Self {
        Self {
            validate_certs: true,
        }
    }
}

/// Connection retry budget.
///
/// `retries`: `-1` retries forever, `0` never retries, `N` allows `N` backoff waits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub retries: i32,
    pub maximum_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: -1,
            maximum_backoff: Duration::from_secs(30),
        }
    }
}

/// Heartbeat scheduling for the liveness tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Percentage of `interval` the tracker waits for traffic before probing. At least 100.
    pub multiplier_percent: u32,
}

impl HeartbeatConfig {
    /// How long the tracker tolerates silence before issuing a heartbeat.
    pub fn patience(&self) -> Duration {
        self.interval * self.multiplier_percent / 100
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: MAX_HEARTBEAT_INTERVAL,
            multiplier_percent: 150,
        }
    }
}

/// Buffer and queue sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBufferConfig {
    /// Fixed capacity of the framer scratch buffer; also the largest accepted frame.
    pub read_buffer_bytes: usize,
    /// Upper bound for a single transport read.
    pub read_chunk_bytes: usize,
    /// Dispatcher mailbox (inbound messages and outbound enqueue requests).
    pub inbound_capacity: usize,
    /// Writer mailbox.
    pub outbound_capacity: usize,
    /// Market and order push feeds.
    pub feed_capacity: usize,
}

impl Default for StreamBufferConfig {
    fn default() -> Self {
        Self {
            read_buffer_bytes: 1024 * 1024,
            read_chunk_bytes: 64 * 1024,
            inbound_capacity: 1000,
            outbound_capacity: 1000,
            feed_capacity: 1000,
        }
    }
}

/// Full client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub host: String,
    pub port: u16,
    pub tls: StreamTlsConfig,
    /// Bound on one attempt: dial, handshake and the wait for the connection message.
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// Deadline for a single transport read or write.
    pub io_timeout: Duration,
    /// How long a caller waits for room in the dispatcher queue.
    pub queue_timeout: Duration,
    /// How long a caller waits for its status reply.
    pub request_timeout: Duration,
    /// Age after which the dispatcher evicts an unanswered pending call.
    pub pending_ttl: Duration,
    /// Bound on the graceful part of `disconnect`.
    pub disconnect_timeout: Duration,
    pub heartbeat: HeartbeatConfig,
    pub buffers: StreamBufferConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_STREAM_HOST.to_string(),
            port: DEFAULT_STREAM_PORT,
            tls: StreamTlsConfig::default(),
            connect_timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
            io_timeout: Duration::from_millis(500),
            queue_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            pending_ttl: Duration::from_secs(60),
            disconnect_timeout: Duration::from_secs(5),
            heartbeat: HeartbeatConfig::default(),
            buffers: StreamBufferConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_validate_certs(mut self, validate_certs: bool) -> Self {
        self.tls.validate_certs = validate_certs;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: i32, maximum_backoff: Duration) -> Self {
        self.retry = RetryConfig {
            retries,
            maximum_backoff,
        };
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        if self.pending_ttl < timeout {
            self.pending_ttl = timeout;
        }
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    pub fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, multiplier_percent: u32) -> Self {
        self.heartbeat = HeartbeatConfig {
            interval,
            multiplier_percent,
        };
        self
    }

    pub fn with_buffers(mut self, buffers: StreamBufferConfig) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.host.trim().is_empty() {
            return Err(StreamError::InvalidConfig("host must not be empty".into()));
        }
        if self.heartbeat.interval < MIN_HEARTBEAT_INTERVAL
            || self.heartbeat.interval > MAX_HEARTBEAT_INTERVAL
        {
            return Err(StreamError::InvalidConfig(format!(
                "heartbeat interval {:?} outside {:?}..={:?}",
                self.heartbeat.interval, MIN_HEARTBEAT_INTERVAL, MAX_HEARTBEAT_INTERVAL
            )));
        }
        if self.heartbeat.multiplier_percent < 100 {
            return Err(StreamError::InvalidConfig(format!(
                "heartbeat multiplier {}% below 100%",
                self.heartbeat.multiplier_percent
            )));
        }
        if self.retry.retries < -1 {
            return Err(StreamError::InvalidConfig(format!(
                "retries must be -1, 0 or positive, got {}",
                self.retry.retries
            )));
        }
        let b = &self.buffers;
        if b.read_buffer_bytes == 0
            || b.read_chunk_bytes == 0
            || b.inbound_capacity == 0
            || b.outbound_capacity == 0
            || b.feed_capacity == 0
        {
            return Err(StreamError::InvalidConfig(
                "buffer and queue sizes must be non-zero".into(),
            ));
        }
        if self.pending_ttl < self.request_timeout {
            return Err(StreamError::InvalidConfig(format!(
                "pending ttl {:?} shorter than request timeout {:?}",
                self.pending_ttl, self.request_timeout
            )));
        }
        if self.io_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(StreamError::InvalidConfig(
                "io and connect timeouts must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Application key and session token handed over by the session-token service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub app_key: String,
    pub session_token: String,
}

impl Credentials {
    pub fn new(app_key: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            session_token: session_token.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_key", &self.app_key)
            .field("session_token", &"<redacted>")
            .finish()
    }
}

/// High-level connection status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Why the reader stopped feeding the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDisconnectCause {
    RemoteClosed,
    ReadFailure { error: String },
    FrameTooLarge { limit: usize },
    Shutdown,
}

/// Per-session statistics snapshot.
#[derive(Clone, Debug)]
pub struct SessionStats {
    pub uptime: Duration,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub anomalies: u64,
    pub recent_anomalies: usize,
    pub last_message_age: Duration,
    pub pending_calls: usize,
    pub expired_calls: u64,
    pub p50_rtt_us: u64,
    pub p99_rtt_us: u64,
    pub rtt_samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.host, "stream-api.betfair.com");
        assert_eq!(config.port, 443);
        assert!(config.tls.validate_certs);
    }

    #[test]
    fn heartbeat_interval_is_bounded() {
        let low = StreamConfig::default().with_heartbeat(Duration::from_millis(499), 100);
        assert!(matches!(low.validate(), Err(StreamError::InvalidConfig(_))));

        let high = StreamConfig::default().with_heartbeat(Duration::from_millis(5001), 100);
        assert!(matches!(high.validate(), Err(StreamError::InvalidConfig(_))));

        let edge = StreamConfig::default().with_heartbeat(Duration::from_millis(500), 100);
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn multiplier_below_full_interval_is_rejected() {
        let config = StreamConfig::default().with_heartbeat(Duration::from_secs(1), 99);
        assert!(matches!(
            config.validate(),
            Err(StreamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn patience_scales_interval_by_multiplier() {
        let hb = HeartbeatConfig {
            interval: Duration::from_millis(2000),
            multiplier_percent: 150,
        };
        assert_eq!(hb.patience(), Duration::from_millis(3000));
    }

    #[test]
    fn request_timeout_builder_keeps_ttl_consistent() {
        let config = StreamConfig::default().with_request_timeout(Duration::from_secs(120));
        assert!(config.pending_ttl >= config.request_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn credentials_debug_hides_token() {
        let creds = Credentials::new("app", "secret-token");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("app"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn retryable_classification() {
        assert!(StreamError::ConnectionFailed("refused".into()).is_retryable());
        assert!(
            StreamError::Timeout {
                context: "connection message".into()
            }
            .is_retryable()
        );
        assert!(!StreamError::Cancelled.is_retryable());
        assert!(!StreamError::NotConnected.is_retryable());
        assert!(StreamError::NotConnected.is_misuse());
        assert!(!StreamError::InvalidConfig("x".into()).is_retryable());
    }
}
