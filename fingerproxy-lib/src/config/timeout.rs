use std::time::Duration;

/// Timeout configuration for the embedded HTTP engines and the TLS handshake
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Idle (keep-alive) timeout for served connections
    pub http_idle: Duration,
    /// Read timeout; applied as the HTTP/1.1 header read deadline
    pub http_read: Duration,
    /// Write timeout; carried for engines that support it
    pub http_write: Duration,
    /// TLS handshake deadline; zero means no deadline
    pub tls_handshake: Duration,
    /// Grace period for draining in-flight connections on shutdown
    pub shutdown: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_idle: Duration::from_secs(180),
            http_read: Duration::from_secs(60),
            http_write: Duration::from_secs(60),
            tls_handshake: Duration::from_secs(10),
            shutdown: Duration::from_secs(30),
        }
    }
}
