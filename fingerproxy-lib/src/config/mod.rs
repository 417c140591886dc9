mod fingerprint;
mod metrics;
mod root;
mod timeout;
mod tls;

pub use fingerprint::FingerprintConfig;
pub use metrics::MetricsConfig;
pub use root::{parse_listen_addr, Config};
pub use timeout::TimeoutConfig;
pub use tls::TlsConfig;
