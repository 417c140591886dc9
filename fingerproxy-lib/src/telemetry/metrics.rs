use std::sync::Arc;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::config::MetricsConfig;
use crate::error::{ProxyError, Result};

/// Prometheus instruments shared across the dispatcher and the injectors.
#[derive(Clone)]
pub struct Metrics {
    /// Served connections, labeled by handshake outcome and negotiated ALPN
    pub requests_total: IntCounterVec,

    /// Fingerprint computation duration, labeled by outcome and header name
    pub fingerprint_duration_seconds: HistogramVec,
}

impl Metrics {
    fn register(registry: &Registry, prefix: &str, buckets: &[f64]) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total number of requests").namespace(prefix.to_string()),
            &["ok", "negotiated_protocol"],
        )
        .map_err(metrics_error)?;
        registry
            .register(Box::new(requests_total.clone()))
            .map_err(metrics_error)?;

        let fingerprint_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "fingerprint_duration_seconds",
                "The duration of fingerprinting requests in seconds",
            )
            .namespace(prefix.to_string())
            .buckets(buckets.to_vec()),
            &["ok", "header_name"],
        )
        .map_err(metrics_error)?;
        registry
            .register(Box::new(fingerprint_duration_seconds.clone()))
            .map_err(metrics_error)?;

        Ok(Self { requests_total, fingerprint_duration_seconds })
    }
}

pub fn init_metrics(cfg: &MetricsConfig) -> Result<(Arc<Metrics>, Registry)> {
    let registry = Registry::new();
    let metrics = Metrics::register(&registry, &cfg.prefix, &cfg.buckets)?;
    Ok((Arc::new(metrics), registry))
}

fn metrics_error(e: prometheus::Error) -> ProxyError {
    ProxyError::Config(format!("Failed to register metrics: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_with_prefix() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
    {
        let cfg = MetricsConfig::default();
        let (metrics, registry) = init_metrics(&cfg)?;

        metrics.requests_total.with_label_values(&["1", "h2"]).inc();
        metrics
            .fingerprint_duration_seconds
            .with_label_values(&["1", "X-JA4-Fingerprint"])
            .observe(0.0001);

        let encoder = prometheus::TextEncoder::new();
        let exposition = encoder.encode_to_string(&registry.gather())?;
        assert!(exposition.contains("fingerproxy_requests_total"));
        assert!(exposition.contains("fingerproxy_fingerprint_duration_seconds"));
        Ok(())
    }
}
