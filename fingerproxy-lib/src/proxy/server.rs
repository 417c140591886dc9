//! Connection dispatcher.
//!
//! Accepts raw TCP, wraps each connection with the ClientHello interceptor,
//! performs the TLS handshake with a deadline, then routes by negotiated
//! ALPN: `h2` connections are driven directly through the HTTP/2 engine
//! (wrapped in the frame recorder), everything else goes over the bridge to
//! the HTTP/1.1 serve loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::time::{timeout, Instant};
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TimeoutConfig};
use crate::error::{ProxyError, Result};
use crate::metadata::{Metadata, TlsConnectionState};
use crate::proxy::bridge::{BridgeConn, BridgeListener};
use crate::proxy::capture::ClientHelloCapture;
use crate::proxy::handler::ProxyHandler;
use crate::proxy::recorder::Http2FrameRecorder;
use crate::telemetry::Metrics;
use crate::tls::build_tls_acceptor;

// Written back verbatim when a client speaks plaintext HTTP to the TLS port
const PLAINTEXT_HTTP_RESPONSE: &[u8] =
    b"HTTP/1.0 400 Bad Request\r\n\r\nClient sent an HTTP request to an HTTPS server.\n";

const HTTP_REQUEST_PREFIXES: [&[u8; 5]; 5] = [b"GET /", b"HEAD ", b"POST ", b"PUT /", b"OPTIO"];

struct Shared {
    handler: Arc<ProxyHandler>,
    bridge: Arc<BridgeListener>,
    metrics: Option<Arc<Metrics>>,
    timeout: TimeoutConfig,
    max_capture: usize,
    max_priority_frames: usize,
    cancel: CancellationToken,
}

/// The TLS-terminating dispatcher plus the two embedded HTTP engines.
pub struct Server {
    tls_acceptor: TlsAcceptor,
    shared: Arc<Shared>,
    active_connections: Arc<AtomicUsize>,
    connections_closed: watch::Sender<()>,
}

impl Server {
    pub fn new(config: &Config, metrics: Option<Arc<Metrics>>) -> Result<Self> {
        let injectors =
            crate::fingerprint::default_header_injectors(&config.fingerprint, metrics.as_deref())?;
        let forwarder = crate::proxy::forwarding::Forwarder::new(
            config.forward_url.clone(),
            config.preserve_host,
        );
        let handler = Arc::new(ProxyHandler::new(
            forwarder,
            injectors,
            config.fingerprint.kubernetes_probe,
        ));

        let tls_acceptor = build_tls_acceptor(&config.tls)?;
        let cancel = CancellationToken::new();
        let bridge = Arc::new(BridgeListener::new(cancel.child_token()));

        let (connections_closed, _) = watch::channel(());

        Ok(Self {
            tls_acceptor,
            shared: Arc::new(Shared {
                handler,
                bridge,
                metrics,
                timeout: config.timeout.clone(),
                max_capture: config.fingerprint.max_capture,
                max_priority_frames: config.fingerprint.max_priority_frames,
                cancel,
            }),
            active_connections: Arc::new(AtomicUsize::new(0)),
            connections_closed,
        })
    }

    /// Token that stops the accept loop and drains the servers when
    /// cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Serves connections from the listener until the shutdown token fires,
    /// then drains and returns the [`ProxyError::ServerClosed`] sentinel.
    /// Only a failure of the listener itself produces a different error.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "server listening");

        // HTTP/1.1 engine, fed exclusively by the bridge
        let http1_loop = tokio::spawn(http1_bridge_loop(Arc::clone(&self.shared)));

        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept error");
                            continue;
                        }
                    };
                    debug!(%peer, "new connection");

                    self.active_connections.fetch_add(1, Ordering::Relaxed);
                    let guard = ConnectionGuard {
                        counter: Arc::clone(&self.active_connections),
                        notifier: self.connections_closed.clone(),
                    };
                    let acceptor = self.tls_acceptor.clone();
                    let shared = Arc::clone(&self.shared);
                    // spawned so a panicking connection cannot reach the
                    // accept loop
                    tokio::spawn(async move {
                        let _guard = guard;
                        serve_conn(acceptor, stream, peer, shared).await;
                    });
                }
            }
        }

        info!(%addr, "shutting down, draining connections");
        drop(listener);
        self.shared.bridge.close();

        let mut closed_rx = self.connections_closed.subscribe();
        let deadline = Instant::now() + self.shared.timeout.shutdown;
        while self.active_connections.load(Ordering::Relaxed) > 0 {
            tokio::select! {
                changed = closed_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        active = self.active_connections.load(Ordering::Relaxed),
                        "shutdown grace period elapsed with connections still active"
                    );
                    break;
                }
            }
        }
        http1_loop.abort();

        Err(ProxyError::ServerClosed)
    }
}

/// Decrements the active connection counter and notifies the drain waiter
/// when the last connection closes.
struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.counter.fetch_sub(1, Ordering::Relaxed) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

async fn serve_conn(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
) {
    let capture = ClientHelloCapture::new(stream);
    let accept = acceptor.accept(capture).into_fallible();

    let handshake = if shared.timeout.tls_handshake.is_zero() {
        accept.await
    } else {
        match timeout(shared.timeout.tls_handshake, accept).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%peer, "tls handshake deadline exceeded");
                inc_requests(&shared.metrics, false, "");
                return;
            }
        }
    };

    let tls = match handshake {
        Ok(tls) => tls,
        Err((e, mut capture)) => {
            if looks_like_http(capture.buffered_prefix(5)) {
                debug!(%peer, "plaintext http request on the tls port");
                if let Err(write_err) = capture.write_all(PLAINTEXT_HTTP_RESPONSE).await {
                    debug!(%peer, error = %write_err, "failed to write 400 response");
                }
                let _ = capture.shutdown().await;
            } else if is_client_error(&e) {
                debug!(%peer, error = %e, "tls handshake failed");
            } else {
                error!(%peer, error = %e, "tls handshake failed");
            }
            inc_requests(&shared.metrics, false, "");
            return;
        }
    };

    let (capture, conn) = tls.get_ref();
    let record = match capture.client_hello() {
        Ok(record) => record.to_vec(),
        Err(e) => {
            error!(%peer, error = %e, "client hello capture failed");
            inc_requests(&shared.metrics, false, "");
            return;
        }
    };
    let tls_state = TlsConnectionState::from_connection(conn);
    let negotiated_protocol = tls_state.negotiated_protocol.clone();
    let metadata = Metadata::new(record, tls_state);

    if negotiated_protocol == "h2" {
        serve_http2_conn(tls, peer, Arc::clone(&metadata), &shared).await;
    } else {
        let (done_tx, done_rx) = oneshot::channel();
        let envelope = BridgeConn { stream: tls, metadata, peer, done: done_tx };
        if shared.bridge.send(envelope).await.is_err() {
            debug!(%peer, "bridge closed before the connection was accepted");
            inc_requests(&shared.metrics, false, &negotiated_protocol);
            return;
        }
        // block until the HTTP/1.1 engine finished the connection
        let _ = done_rx.await;
    }

    inc_requests(&shared.metrics, true, &negotiated_protocol);
}

async fn serve_http2_conn(
    tls: crate::proxy::bridge::BridgeStream,
    peer: SocketAddr,
    metadata: Arc<Metadata>,
    shared: &Shared,
) {
    let recorder = Http2FrameRecorder::new(
        tls,
        Arc::clone(&metadata),
        shared.max_capture,
        shared.max_priority_frames,
    );

    let handler = Arc::clone(&shared.handler);
    let svc = service_fn(move |req: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        let metadata = Arc::clone(&metadata);
        async move {
            Ok::<_, std::convert::Infallible>(handler.handle(req, peer, metadata).await)
        }
    });

    let mut builder = http2::Builder::new(TokioExecutor::new());
    builder
        .timer(TokioTimer::new())
        .keep_alive_interval(Some(shared.timeout.http_idle))
        .keep_alive_timeout(shared.timeout.http_read);

    let conn = builder.serve_connection(TokioIo::new(recorder), svc);
    tokio::pin!(conn);
    tokio::select! {
        served = conn.as_mut() => {
            if let Err(e) = served {
                debug!(%peer, error = %e, "http2 connection error");
            }
        }
        _ = shared.cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.as_mut().await {
                debug!(%peer, error = %e, "http2 connection error during shutdown");
            }
        }
    }
}

/// Serve loop of the HTTP/1.1 engine: accept from the bridge until it
/// closes, one task per connection.
async fn http1_bridge_loop(shared: Arc<Shared>) {
    loop {
        let envelope = match shared.bridge.accept().await {
            Ok(envelope) => envelope,
            Err(_) => {
                debug!("bridge listener closed, http1 loop exiting");
                return;
            }
        };
        let shared = Arc::clone(&shared);
        tokio::spawn(async move { serve_http1_conn(envelope, &shared).await });
    }
}

async fn serve_http1_conn(envelope: BridgeConn, shared: &Shared) {
    let BridgeConn { stream, metadata, peer, done } = envelope;

    let handler = Arc::clone(&shared.handler);
    let svc = service_fn(move |req: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        let metadata = Arc::clone(&metadata);
        async move {
            Ok::<_, std::convert::Infallible>(handler.handle(req, peer, metadata).await)
        }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(shared.timeout.http_read);

    let conn = builder.serve_connection(TokioIo::new(stream), svc);
    tokio::pin!(conn);
    tokio::select! {
        served = conn.as_mut() => {
            if let Err(e) = served {
                debug!(%peer, error = %e, "http1 connection error");
            }
        }
        _ = shared.cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.as_mut().await {
                debug!(%peer, error = %e, "http1 connection error during shutdown");
            }
        }
    }

    let _ = done.send(());
}

fn looks_like_http(prefix: &[u8]) -> bool {
    HTTP_REQUEST_PREFIXES
        .iter()
        .any(|verb| prefix == verb.as_slice())
}

/// Peer-caused handshake failures (EOF, reset, deadline, TLS alert) are
/// expected noise and only logged verbosely.
fn is_client_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    if matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::NotConnected
    ) {
        return true;
    }
    e.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|tls_err| {
            matches!(
                tls_err,
                rustls::Error::AlertReceived(_)
                    | rustls::Error::InappropriateMessage { .. }
                    | rustls::Error::InappropriateHandshakeMessage { .. }
            )
        })
}

fn inc_requests(metrics: &Option<Arc<Metrics>>, ok: bool, negotiated_protocol: &str) {
    if let Some(metrics) = metrics {
        metrics
            .requests_total
            .with_label_values(&[if ok { "1" } else { "0" }, negotiated_protocol])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_verb_prefixes_are_recognized() {
        assert!(looks_like_http(b"GET /"));
        assert!(looks_like_http(b"POST "));
        assert!(looks_like_http(b"OPTIO"));
        assert!(!looks_like_http(b"\x16\x03\x01\x02\x00"));
        assert!(!looks_like_http(b"GET"));
    }

    #[test]
    fn eof_and_reset_are_client_errors() {
        use std::io::{Error, ErrorKind};
        assert!(is_client_error(&Error::from(ErrorKind::UnexpectedEof)));
        assert!(is_client_error(&Error::from(ErrorKind::ConnectionReset)));
        assert!(!is_client_error(&Error::other("cert configuration broken")));
    }

    #[test]
    fn tls_alert_is_a_client_error() {
        use std::io::Error;
        let alert = rustls::Error::AlertReceived(rustls::AlertDescription::UnknownCA);
        assert!(is_client_error(&Error::new(std::io::ErrorKind::InvalidData, alert)));
    }
}
