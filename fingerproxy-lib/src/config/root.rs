use std::net::SocketAddr;

use http::Uri;

use crate::error::{ProxyError, Result};

use super::fingerprint::FingerprintConfig;
use super::metrics::MetricsConfig;
use super::timeout::TimeoutConfig;
use super::tls::TlsConfig;

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    /// Address and port to listen on
    pub listen: SocketAddr,
    /// Backend URL that requests will be forwarded to
    pub forward_url: Uri,
    /// Preserve the original Host header from clients when forwarding
    pub preserve_host: bool,
    /// TLS termination configuration
    pub tls: TlsConfig,
    /// Fingerprinting configuration
    pub fingerprint: FingerprintConfig,
    /// Timeout configuration
    pub timeout: TimeoutConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

impl Config {
    /// Validates cross-field constraints that clap cannot express.
    pub fn validate(&self) -> Result<()> {
        match self.forward_url.scheme_str() {
            Some("http") => {}
            Some(other) => {
                return Err(ProxyError::Config(format!(
                    "unsupported forward-url scheme {other:?}, only \"http\" is supported"
                )));
            }
            None => {
                return Err(ProxyError::Config(
                    "forward-url must be absolute, e.g. http://localhost:80".to_string(),
                ));
            }
        }
        if self.forward_url.host().is_none() {
            return Err(ProxyError::Config("forward-url has no host".to_string()));
        }
        if self.fingerprint.max_priority_frames == 0 {
            return Err(ProxyError::Config(
                "max-h2-priority-frames must be at least 1".to_string(),
            ));
        }
        if self.metrics.buckets.is_empty() {
            return Err(ProxyError::Config(
                "duration-metric-buckets must contain at least one bucket".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses a listen address, accepting the `:443` shorthand for
/// "all interfaces, port 443".
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr> {
    let normalized = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    normalized
        .parse()
        .map_err(|e| ProxyError::Config(format!("invalid listen address {addr:?}: {e}")))
}
