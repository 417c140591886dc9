#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fingerproxy_lib::{
    config::{parse_listen_addr, Config, FingerprintConfig, MetricsConfig, TimeoutConfig, TlsConfig},
    error::ProxyError,
    init_metrics, init_tracing, start_metrics_server, Server,
};
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(version, about = "TLS-terminating reverse proxy that fingerprints clients (JA3, JA4, Akamai HTTP/2)")]
struct Cli {
    /// Listening address
    #[arg(long, env = "LISTEN_ADDR", default_value = ":443")]
    listen_addr: String,

    /// Backend URL that the requests will be forwarded to
    #[arg(long, env = "FORWARD_URL", default_value = "http://localhost:80")]
    forward_url: String,

    /// TLS certificate filename
    #[arg(long, env = "CERT_FILENAME", default_value = "tls.crt")]
    cert_filename: PathBuf,

    /// TLS certificate key filename
    #[arg(long, env = "CERTKEY_FILENAME", default_value = "tls.key")]
    certkey_filename: PathBuf,

    /// Listening address of Prometheus metrics
    #[arg(long, env = "METRICS_LISTEN_ADDR", default_value = ":9035")]
    metrics_listen_addr: String,

    /// Histogram buckets of the fingerprint duration metric, comma-separated
    /// seconds
    #[arg(
        long,
        env = "DURATION_METRIC_BUCKETS",
        default_value = ".00001, .00002, .00005, .0001, .0002, .0005, .001, .002, .005, .01"
    )]
    duration_metric_buckets: String,

    /// Send the original Host header to the backend
    #[arg(long, env = "PRESERVE_HOST")]
    preserve_host: bool,

    /// Maximum number of PRIORITY frames recorded per HTTP/2 connection
    #[arg(long, env = "MAX_H2_PRIORITY_FRAMES", default_value_t = 10000)]
    max_h2_priority_frames: usize,

    /// Answer kubernetes liveness/readiness probes directly
    #[arg(
        long,
        env = "ENABLE_KUBERNETES_PROBE",
        action = clap::ArgAction::Set,
        default_value_t = true
    )]
    enable_kubernetes_probe: bool,

    /// HTTP keep-alive idle timeout
    #[arg(long, env = "TIMEOUT_HTTP_IDLE", default_value = "180s")]
    timeout_http_idle: String,

    /// HTTP read timeout
    #[arg(long, env = "TIMEOUT_HTTP_READ", default_value = "60s")]
    timeout_http_read: String,

    /// HTTP write timeout
    #[arg(long, env = "TIMEOUT_HTTP_WRITE", default_value = "60s")]
    timeout_http_write: String,

    /// TLS handshake timeout, 0 disables the deadline
    #[arg(long, env = "TIMEOUT_TLS_HANDSHAKE", default_value = "10s")]
    timeout_tls_handshake: String,

    /// Accepted for compatibility; responses are streamed to the client
    /// without an intermediary buffer
    #[arg(long, env = "REVERSE_PROXY_FLUSH_INTERVAL", default_value = "100ms")]
    reverse_proxy_flush_interval: String,

    /// Enable verbose logs
    #[arg(long, env = "VERBOSE")]
    verbose: bool,
}

fn parse_duration(flag: &str, value: &str) -> Result<Duration, ProxyError> {
    humantime::parse_duration(value)
        .map_err(|e| ProxyError::Config(format!("invalid {flag} {value:?}: {e}")))
}

fn parse_buckets(value: &str) -> Result<Vec<f64>, ProxyError> {
    value
        .split(',')
        .map(|bucket| {
            let bucket = bucket.trim();
            bucket
                .parse::<f64>()
                .map_err(|e| ProxyError::Config(format!("invalid duration metric bucket {bucket:?}: {e}")))
        })
        .collect()
}

fn build_config(cli: &Cli) -> Result<(Config, std::net::SocketAddr), ProxyError> {
    let forward_url = cli
        .forward_url
        .parse::<http::Uri>()
        .map_err(|e| ProxyError::Config(format!("invalid forward url {:?}: {e}", cli.forward_url)))?;

    let config = Config {
        listen: parse_listen_addr(&cli.listen_addr)?,
        forward_url,
        preserve_host: cli.preserve_host,
        tls: TlsConfig {
            cert_path: cli.cert_filename.clone(),
            key_path: cli.certkey_filename.clone(),
            watch: true,
        },
        fingerprint: FingerprintConfig {
            max_priority_frames: cli.max_h2_priority_frames,
            kubernetes_probe: cli.enable_kubernetes_probe,
            ..FingerprintConfig::default()
        },
        timeout: TimeoutConfig {
            http_idle: parse_duration("http idle timeout", &cli.timeout_http_idle)?,
            http_read: parse_duration("http read timeout", &cli.timeout_http_read)?,
            http_write: parse_duration("http write timeout", &cli.timeout_http_write)?,
            tls_handshake: parse_duration("tls handshake timeout", &cli.timeout_tls_handshake)?,
            ..TimeoutConfig::default()
        },
        metrics: MetricsConfig {
            listen: Some(parse_listen_addr(&cli.metrics_listen_addr)?),
            buckets: parse_buckets(&cli.duration_metric_buckets)?,
            ..MetricsConfig::default()
        },
    };

    // validated even though unused, so typos fail loudly at startup
    parse_duration("reverse proxy flush interval", &cli.reverse_proxy_flush_interval)?;

    config.validate()?;
    let metrics_listen = config.metrics.listen.unwrap_or(([0, 0, 0, 0], 9035).into());
    Ok((config, metrics_listen))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (config, metrics_listen) = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(%e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let (metrics, registry) = match init_metrics(&config.metrics) {
        Ok(pair) => pair,
        Err(e) => {
            error!(%e, "failed to initialize metrics");
            std::process::exit(2);
        }
    };

    let config = Arc::new(config);
    let server = match Server::new(&config, Some(metrics)) {
        Ok(server) => server,
        Err(e) => {
            error!(%e, "failed to build server");
            std::process::exit(1);
        }
    };

    let shutdown = server.shutdown_token();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!(%e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
        signal_shutdown.cancel();
    });

    let metrics_cancel = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_listen, registry, metrics_cancel).await {
            error!(%e, "metrics server exited with error");
        }
    });

    let listener = match TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%e, addr = %config.listen, "failed to bind listener");
            std::process::exit(1);
        }
    };

    match server.serve(listener).await {
        Err(ProxyError::ServerClosed) => info!("server closed"),
        Err(e) => {
            error!(%e, "server exited with error");
            std::process::exit(1);
        }
        Ok(()) => {}
    }
}
