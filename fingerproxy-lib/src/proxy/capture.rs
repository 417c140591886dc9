//! ClientHello interception.
//!
//! [`ClientHelloCapture`] wraps a freshly accepted connection and
//! shadow-copies the bytes returned by reads into an internal buffer until
//! one complete TLS record has been captured. The first record the TLS
//! engine ever reads is the ClientHello, so no handshake parsing or replay
//! is needed. Reads and writes behave exactly like the wrapped stream's.

use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const RECORD_TYPE_HANDSHAKE: u8 = 0x16;
const RECORD_HEADER_LEN: usize = 5;

// Record-layer legacy versions from SSL 3.0 through TLS 1.3
const VERSION_MIN: u16 = 0x0300;
const VERSION_MAX: u16 = 0x0304;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    #[error("tls record is not a handshake")]
    NotHandshakeRecord,

    #[error("unknown tls version in record header")]
    UnknownTlsVersion,

    #[error("client hello record is incomplete")]
    IncompleteClientHello,
}

#[derive(Debug)]
pub struct ClientHelloCapture<S> {
    inner: S,
    buf: Vec<u8>,
    // total record length including the 5-byte header, 0 while unknown
    expected_len: usize,
    error: Option<CaptureError>,
}

impl<S> ClientHelloCapture<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, buf: Vec::with_capacity(2048), expected_len: 0, error: None }
    }

    fn complete(&self) -> bool {
        self.expected_len > 0 && self.buf.len() >= self.expected_len
    }

    /// The captured ClientHello record. Errs while the capture is still in
    /// flight or when the peer did not start with a handshake record.
    pub fn client_hello(&self) -> Result<&[u8], CaptureError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.complete() {
            return Err(CaptureError::IncompleteClientHello);
        }
        Ok(&self.buf[..self.expected_len])
    }

    /// Whatever was buffered so far, capped at `n` bytes. Available even
    /// after a capture error; used to recognize plaintext HTTP requests.
    pub fn buffered_prefix(&self, n: usize) -> &[u8] {
        &self.buf[..self.buf.len().min(n)]
    }

    fn shadow_copy(&mut self, data: &[u8]) {
        if self.error.is_some() || self.complete() {
            return;
        }
        self.buf.extend_from_slice(data);

        if self.expected_len == 0 && self.buf.len() >= RECORD_HEADER_LEN {
            if self.buf[0] != RECORD_TYPE_HANDSHAKE {
                self.error = Some(CaptureError::NotHandshakeRecord);
                return;
            }
            let version = u16::from_be_bytes([self.buf[1], self.buf[2]]);
            if !(VERSION_MIN..=VERSION_MAX).contains(&version) {
                self.error = Some(CaptureError::UnknownTlsVersion);
                return;
            }
            let record_len = u16::from_be_bytes([self.buf[3], self.buf[4]]) as usize;
            self.expected_len = RECORD_HEADER_LEN + record_len;
        }

        if self.complete() {
            // drop anything past the first record
            self.buf.truncate(self.expected_len);
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ClientHelloCapture<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            let after = buf.filled().len();
            if after > before {
                let data = &buf.filled()[before..after];
                self.as_mut().get_mut().shadow_copy(data);
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ClientHelloCapture<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
