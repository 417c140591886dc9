use std::net::SocketAddr;

/// Prometheus exposition configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Dedicated listener for the /metrics endpoint, None disables it
    pub listen: Option<SocketAddr>,
    /// Metric name prefix (namespace)
    pub prefix: String,
    /// Buckets of the fingerprint duration histogram, in seconds
    pub buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: None,
            prefix: "fingerproxy".to_string(),
            buckets: vec![
                0.00001, 0.00002, 0.00005, 0.0001, 0.0002, 0.0005, 0.001, 0.002, 0.005, 0.01,
            ],
        }
    }
}
