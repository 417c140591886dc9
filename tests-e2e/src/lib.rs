//! Shared helpers for the end-to-end tests: an in-process proxy with
//! generated certificates, an echoing backend, and TLS client builders.

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fingerproxy_lib::config::{
    Config, FingerprintConfig, MetricsConfig, TimeoutConfig, TlsConfig,
};
use fingerproxy_lib::proxy::Server;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tempfile::NamedTempFile;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub struct TestProxy {
    pub addr: SocketAddr,
    pub cert_der: CertificateDer<'static>,
    _cert_file: NamedTempFile,
    _key_file: NamedTempFile,
}

fn write_temp_file(contents: &str) -> TestResult<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

/// HTTP/1.1 backend that answers every request with `OK` and echoes the
/// request headers back as `echo-<name>` response headers.
pub async fn spawn_echo_backend() -> TestResult<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let svc = service_fn(|req: Request<Incoming>| async move {
                    let mut response = hyper::Response::new(Full::new(Bytes::from_static(b"OK")));
                    for (name, value) in req.headers() {
                        let echoed = format!("echo-{name}");
                        if let (Ok(name), value) = (
                            echoed.parse::<http::HeaderName>(),
                            value.clone(),
                        ) {
                            response.headers_mut().insert(name, value);
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });
    Ok(addr)
}

/// Starts the full proxy in-process, forwarding to `backend_addr`.
pub async fn start_proxy(backend_addr: SocketAddr) -> TestResult<TestProxy> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])?;
    let cert_file = write_temp_file(&cert.cert.pem())?;
    let key_file = write_temp_file(&cert.signing_key.serialize_pem())?;
    let cert_der = cert.cert.der().clone();

    let config = Config {
        listen: "127.0.0.1:0".parse()?,
        forward_url: format!("http://{backend_addr}").parse()?,
        preserve_host: false,
        tls: TlsConfig {
            cert_path: cert_file.path().to_path_buf(),
            key_path: key_file.path().to_path_buf(),
            watch: false,
        },
        fingerprint: FingerprintConfig::default(),
        timeout: TimeoutConfig {
            tls_handshake: Duration::from_secs(5),
            shutdown: Duration::from_secs(2),
            ..TimeoutConfig::default()
        },
        metrics: MetricsConfig { listen: None, ..MetricsConfig::default() },
    };

    let server = Server::new(&config, None)?;
    let listener = TcpListener::bind(config.listen).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    sleep(Duration::from_millis(50)).await;

    Ok(TestProxy { addr, cert_der, _cert_file: cert_file, _key_file: key_file })
}

/// TLS client connector trusting the proxy's certificate, optionally
/// offering ALPN protocols.
pub fn tls_connector(cert_der: &CertificateDer<'static>, alpn: &[&str]) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add_parsable_certificates([cert_der.clone()]);
    let mut client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    client_config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    TlsConnector::from(Arc::new(client_config))
}

/// Collects the `echo-*` response headers into a map keyed by the original
/// header name.
pub fn echoed_headers(response: &hyper::Response<Incoming>) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix("echo-")?;
            Some((name.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}
