//! Header injectors: request-scoped hooks that compute fingerprints from the
//! connection metadata and name the header the value goes into.

use std::sync::Arc;
use std::time::Instant;

use http::{Extensions, HeaderName};
use prometheus::Histogram;
use tracing::debug;

use crate::config::FingerprintConfig;
use crate::error::{ProxyError, Result};
use crate::metadata::Metadata;
use crate::telemetry::Metrics;

use super::client_hello::parse;
use super::ja4::Transport;
use super::FingerprintError;

/// Computes one fingerprint string from a connection's metadata.
pub type FingerprintFn =
    Arc<dyn Fn(&Metadata) -> std::result::Result<String, FingerprintError> + Send + Sync>;

/// A hook invoked by the forwarding handler for every outbound request.
pub trait HeaderInjector: Send + Sync {
    fn header_name(&self) -> &HeaderName;

    /// The value to set, resolved from the request's extensions. An empty
    /// value means "do not set the header".
    fn header_value(
        &self,
        extensions: &Extensions,
    ) -> std::result::Result<String, FingerprintError>;
}

/// Injector that runs a [`FingerprintFn`] against the request's
/// [`Metadata`] and observes the computation duration.
pub struct FingerprintHeaderInjector {
    header_name: HeaderName,
    // configured spelling, kept for metric labels (HeaderName lowercases)
    label: String,
    fingerprint: FingerprintFn,
    duration_succeed: Option<Histogram>,
    duration_error: Option<Histogram>,
}

impl FingerprintHeaderInjector {
    pub fn new(header_name: &str, fingerprint: FingerprintFn) -> Result<Self> {
        let label = header_name.to_string();
        let header_name = header_name
            .parse::<HeaderName>()
            .map_err(|e| ProxyError::Config(format!("invalid header name {header_name:?}: {e}")))?;
        Ok(Self { header_name, label, fingerprint, duration_succeed: None, duration_error: None })
    }

    pub fn with_metrics(mut self, metrics: &Metrics) -> Self {
        self.duration_succeed = Some(
            metrics
                .fingerprint_duration_seconds
                .with_label_values(&["1", &self.label]),
        );
        self.duration_error = Some(
            metrics
                .fingerprint_duration_seconds
                .with_label_values(&["0", &self.label]),
        );
        self
    }
}

impl HeaderInjector for FingerprintHeaderInjector {
    fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    fn header_value(
        &self,
        extensions: &Extensions,
    ) -> std::result::Result<String, FingerprintError> {
        let metadata = extensions
            .get::<Arc<Metadata>>()
            .ok_or(FingerprintError::NoContextMetadata)?;

        let start = Instant::now();
        let value = (self.fingerprint)(metadata);
        let duration = start.elapsed();
        debug!(header = %self.header_name, ?duration, "fingerprint computed");

        let observer = if value.is_ok() { &self.duration_succeed } else { &self.duration_error };
        if let Some(histogram) = observer {
            histogram.observe(duration.as_secs_f64());
        }

        value
    }
}

/// JA3 digest of the connection's ClientHello.
pub fn ja3_fingerprint(md: &Metadata) -> std::result::Result<String, FingerprintError> {
    let ch = parse(&md.client_hello_record)?;
    Ok(super::ja3::ja3_digest(&ch))
}

/// JA4 string of the connection's ClientHello.
pub fn ja4_fingerprint(md: &Metadata) -> std::result::Result<String, FingerprintError> {
    let ch = parse(&md.client_hello_record)?;
    Ok(super::ja4::ja4_string(&ch, Transport::Tcp))
}

/// Akamai-style HTTP/2 fingerprint. Empty on non-HTTP/2 connections, which
/// makes the handler skip the header.
pub fn make_http2_fingerprint(max_priority_frames: usize) -> FingerprintFn {
    Arc::new(move |md: &Metadata| {
        if !md.tls.is_http2() {
            debug!(
                protocol = %md.tls.negotiated_protocol,
                "not an http2 connection, skipping http2 fingerprint"
            );
            return Ok(String::new());
        }
        let frames = md.http2_frames().cloned().unwrap_or_default();
        Ok(frames.serialize(max_priority_frames))
    })
}

/// The standard injector set: JA3, JA4 and HTTP/2, with the configured
/// header names.
pub fn default_header_injectors(
    cfg: &FingerprintConfig,
    metrics: Option<&Metrics>,
) -> Result<Vec<Arc<dyn HeaderInjector>>> {
    let mut injectors = vec![
        FingerprintHeaderInjector::new(&cfg.ja3_header, Arc::new(ja3_fingerprint))?,
        FingerprintHeaderInjector::new(&cfg.ja4_header, Arc::new(ja4_fingerprint))?,
        FingerprintHeaderInjector::new(
            &cfg.http2_header,
            make_http2_fingerprint(cfg.max_priority_frames),
        )?,
    ];
    if let Some(metrics) = metrics {
        injectors = injectors
            .into_iter()
            .map(|i| i.with_metrics(metrics))
            .collect();
    }
    Ok(injectors
        .into_iter()
        .map(|i| Arc::new(i) as Arc<dyn HeaderInjector>)
        .collect())
}
