//! Per-connection data captured for fingerprinting.
//!
//! A [`Metadata`] is created once per TLS-accepted connection and shared with
//! every request served on that connection through `http::Extensions`.

mod http2;

pub use http2::{HeaderField, Http2FingerprintingFrames, Priority, Setting};

use std::sync::Arc;
use std::sync::OnceLock;

use tokio_rustls::rustls::ServerConnection;

/// TLS facts captured from the server connection after the handshake.
#[derive(Debug, Clone, Default)]
pub struct TlsConnectionState {
    /// Negotiated ALPN protocol, empty when none was agreed
    pub negotiated_protocol: String,
    /// Negotiated TLS version, e.g. "TLSv1_3"
    pub version: String,
    /// SNI sent by the peer
    pub server_name: Option<String>,
    /// Negotiated cipher suite
    pub cipher_suite: String,
}

impl TlsConnectionState {
    pub fn from_connection(conn: &ServerConnection) -> Self {
        Self {
            negotiated_protocol: conn
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default(),
            version: conn
                .protocol_version()
                .map(|v| format!("{v:?}"))
                .unwrap_or_default(),
            server_name: conn.server_name().map(str::to_string),
            cipher_suite: conn
                .negotiated_cipher_suite()
                .map(|cs| format!("{:?}", cs.suite()))
                .unwrap_or_default(),
        }
    }

    pub fn is_http2(&self) -> bool {
        self.negotiated_protocol == "h2"
    }
}

/// Data captured from one connection for fingerprinting.
///
/// Filled by the dispatcher (ClientHello, TLS state) before any request is
/// served, and by the HTTP/2 frame recorder (frame record, published once)
/// before the first request surfaces. Requests only ever read it.
#[derive(Debug)]
pub struct Metadata {
    /// Raw TLS ClientHello bytes, record header included
    pub client_hello_record: Vec<u8>,

    /// TLS connection state after the handshake
    pub tls: TlsConnectionState,

    http2_frames: OnceLock<Http2FingerprintingFrames>,
}

impl Metadata {
    pub fn new(client_hello_record: Vec<u8>, tls: TlsConnectionState) -> Arc<Self> {
        Arc::new(Self { client_hello_record, tls, http2_frames: OnceLock::new() })
    }

    /// Frames observed on the HTTP/2 connection preface, if any were
    /// recorded. Always `None` on HTTP/1.1 connections.
    pub fn http2_frames(&self) -> Option<&Http2FingerprintingFrames> {
        self.http2_frames.get()
    }

    /// Publishes the frame record. Only the first call wins; the record is
    /// immutable afterwards.
    pub fn set_http2_frames(&self, frames: Http2FingerprintingFrames) {
        let _ = self.http2_frames.set(frames);
    }
}
