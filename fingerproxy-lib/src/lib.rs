#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod metadata;
pub mod proxy;
pub mod telemetry;
pub mod tls;

pub use config::{parse_listen_addr, Config, FingerprintConfig, MetricsConfig, TimeoutConfig, TlsConfig};
pub use error::{ProxyError, Result};
pub use fingerprint::{
    default_header_injectors, ja3_digest, ja3_string, ja4_string, parse_client_hello,
    FingerprintHeaderInjector, HeaderInjector, Transport,
};
pub use metadata::{Http2FingerprintingFrames, Metadata, TlsConnectionState};
pub use proxy::{BridgeListener, ClientHelloCapture, Http2FrameRecorder, Server};
pub use telemetry::{init_metrics, init_tracing, start_metrics_server};
pub use tls::build_tls_acceptor;
