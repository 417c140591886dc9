use std::pin::Pin;
use std::task::{Context, Poll};

use fingerproxy_lib::proxy::{CaptureError, ClientHelloCapture};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Stream that serves a fixed byte sequence in chunks of at most
/// `chunk_size` bytes, then EOF.
struct ChunkedStream {
    data: Vec<u8>,
    pos: usize,
    chunk_size: usize,
}

impl ChunkedStream {
    fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self { data, pos: 0, chunk_size }
    }
}

impl AsyncRead for ChunkedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let remaining = self.data.len() - self.pos;
        if remaining == 0 {
            return Poll::Ready(Ok(()));
        }
        let n = remaining.min(self.chunk_size).min(buf.remaining());
        buf.put_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ChunkedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn client_hello_record(body_len: usize) -> Vec<u8> {
    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(body_len as u16).to_be_bytes());
    record.extend((0..body_len).map(|i| i as u8));
    record
}

async fn drain<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> TestResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 277];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn captures_exactly_one_record_regardless_of_chunking() -> TestResult<()> {
    let record = client_hello_record(517);
    for chunk_size in [1, 2, 3, 4, 5, 7, 16, 64, 517, 4096] {
        let mut capture =
            ClientHelloCapture::new(ChunkedStream::new(record.clone(), chunk_size));
        let passed = drain(&mut capture).await?;
        assert_eq!(passed, record, "reads must be transparent (chunk {chunk_size})");
        assert_eq!(
            capture.client_hello()?,
            record.as_slice(),
            "capture must equal the record (chunk {chunk_size})"
        );
    }
    Ok(())
}

#[tokio::test]
async fn post_handshake_bytes_are_not_captured() -> TestResult<()> {
    let record = client_hello_record(32);
    let mut data = record.clone();
    // a second record and application data must never enter the capture
    data.extend_from_slice(&[0x16, 0x03, 0x03, 0x00, 0x02, 0xaa, 0xbb]);
    data.extend_from_slice(b"after the handshake");

    for chunk_size in [1, 3, 10, 1024] {
        let mut capture = ClientHelloCapture::new(ChunkedStream::new(data.clone(), chunk_size));
        let passed = drain(&mut capture).await?;
        assert_eq!(passed, data);
        assert_eq!(capture.client_hello()?, record.as_slice());
    }
    Ok(())
}

#[tokio::test]
async fn non_handshake_record_is_an_error() -> TestResult<()> {
    // 0x17 = application data
    let mut data = client_hello_record(16);
    data[0] = 0x17;
    let mut capture = ClientHelloCapture::new(ChunkedStream::new(data, 1024));
    drain(&mut capture).await?;
    assert_eq!(capture.client_hello().unwrap_err(), CaptureError::NotHandshakeRecord);
    Ok(())
}

#[tokio::test]
async fn unknown_tls_version_is_an_error() -> TestResult<()> {
    let mut data = client_hello_record(16);
    data[1] = 0x02;
    data[2] = 0x00;
    let mut capture = ClientHelloCapture::new(ChunkedStream::new(data, 1024));
    drain(&mut capture).await?;
    assert_eq!(capture.client_hello().unwrap_err(), CaptureError::UnknownTlsVersion);
    Ok(())
}

#[tokio::test]
async fn short_read_leaves_capture_incomplete() -> TestResult<()> {
    let record = client_hello_record(100);
    // stream ends 10 bytes short of the full record
    let truncated = record[..record.len() - 10].to_vec();
    let mut capture = ClientHelloCapture::new(ChunkedStream::new(truncated, 7));
    drain(&mut capture).await?;
    assert_eq!(
        capture.client_hello().unwrap_err(),
        CaptureError::IncompleteClientHello
    );
    Ok(())
}

#[tokio::test]
async fn plaintext_http_prefix_is_available_after_error() -> TestResult<()> {
    let data = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
    let mut capture = ClientHelloCapture::new(ChunkedStream::new(data, 1024));
    drain(&mut capture).await?;
    assert_eq!(capture.client_hello().unwrap_err(), CaptureError::NotHandshakeRecord);
    assert_eq!(capture.buffered_prefix(5), b"GET /");
    Ok(())
}
