//! Bridge listener rendezvous semantics.
//!
//! The delivered connection carries a live TLS stream, so these tests go
//! through a real loopback handshake to produce envelopes.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use fingerproxy_lib::metadata::{Metadata, TlsConnectionState};
use fingerproxy_lib::proxy::{BridgeConn, BridgeError, BridgeListener, ClientHelloCapture};
use fingerproxy_lib::tls::build_tls_acceptor;
use fingerproxy_lib::TlsConfig;
use tempfile::NamedTempFile;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn write_temp_file(contents: &str) -> TestResult<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

async fn handshaken_envelope() -> TestResult<(BridgeConn, oneshot::Receiver<()>)> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])?;
    let cert_file = write_temp_file(&cert.cert.pem())?;
    let key_file = write_temp_file(&cert.signing_key.serialize_pem())?;

    let acceptor = build_tls_acceptor(&TlsConfig {
        cert_path: cert_file.path().to_path_buf(),
        key_path: key_file.path().to_path_buf(),
        watch: false,
    })?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let mut roots = RootCertStore::empty();
    roots.add_parsable_certificates([cert.cert.der().clone()]);
    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let client = tokio::spawn(async move {
        let tcp = TcpStream::connect(addr).await?;
        let tls = connector
            .connect(ServerName::try_from("localhost")?, tcp)
            .await?;
        // hold the client end open for the duration of the test
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(tls);
        Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
    });

    let (stream, peer) = listener.accept().await?;
    let tls = acceptor.accept(ClientHelloCapture::new(stream)).await?;
    drop(client);

    let record = tls.get_ref().0.client_hello()?.to_vec();
    let metadata = Metadata::new(record, TlsConnectionState::default());
    let (done_tx, done_rx) = oneshot::channel();
    Ok((BridgeConn { stream: tls, metadata, peer, done: done_tx }, done_rx))
}

#[tokio::test]
async fn send_completes_when_accepted() -> TestResult<()> {
    let bridge = Arc::new(BridgeListener::new(CancellationToken::new()));
    let (envelope, _done_rx) = handshaken_envelope().await?;

    let acceptor_side = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.accept().await })
    };

    timeout(Duration::from_secs(2), bridge.send(envelope)).await??;
    let accepted = timeout(Duration::from_secs(2), acceptor_side).await???;
    assert!(accepted.metadata.client_hello_record.starts_with(&[0x16]));
    Ok(())
}

#[tokio::test]
async fn accept_fails_after_close() -> TestResult<()> {
    let bridge = BridgeListener::new(CancellationToken::new());
    bridge.close();
    assert_eq!(bridge.accept().await.unwrap_err(), BridgeError::Closed);
    Ok(())
}

#[tokio::test]
async fn send_fails_after_close() -> TestResult<()> {
    let bridge = BridgeListener::new(CancellationToken::new());
    bridge.close();
    let (envelope, _done_rx) = handshaken_envelope().await?;
    assert_eq!(bridge.send(envelope).await.unwrap_err(), BridgeError::Closed);
    Ok(())
}

#[tokio::test]
async fn pending_accept_fails_on_cancellation() -> TestResult<()> {
    let cancel = CancellationToken::new();
    let bridge = Arc::new(BridgeListener::new(cancel.clone()));

    let pending = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move { bridge.accept().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let result = timeout(Duration::from_secs(2), pending).await??;
    assert_eq!(result.unwrap_err(), BridgeError::Closed);
    Ok(())
}
