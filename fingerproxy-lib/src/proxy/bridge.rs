//! In-process bridge listener.
//!
//! The dispatcher terminates TLS itself, but HTTP/1.1 connections still need
//! a stock HTTP/1.1 serve loop. The bridge is a rendezvous masquerading as a
//! listener: the dispatcher hands an already-handshaken connection to
//! [`BridgeListener::send`], the HTTP/1.1 loop picks it up via
//! [`BridgeListener::accept`]. One delivery, one acceptance.

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_rustls::server::TlsStream;
use tokio_util::sync::CancellationToken;

use crate::metadata::Metadata;
use crate::proxy::capture::ClientHelloCapture;

pub type BridgeStream = TlsStream<ClientHelloCapture<TcpStream>>;

/// A TLS connection en route to the HTTP/1.1 engine, together with its
/// metadata and a completion signal the dispatcher blocks on until the
/// engine has finished serving the connection.
#[derive(Debug)]
pub struct BridgeConn {
    pub stream: BridgeStream,
    pub metadata: Arc<Metadata>,
    pub peer: std::net::SocketAddr,
    /// Dropped (or fired) when the connection has been fully served
    pub done: oneshot::Sender<()>,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("bridge listener closed")]
    Closed,
}

pub struct BridgeListener {
    tx: mpsc::Sender<(BridgeConn, oneshot::Sender<()>)>,
    rx: Mutex<mpsc::Receiver<(BridgeConn, oneshot::Sender<()>)>>,
    cancel: CancellationToken,
}

impl BridgeListener {
    pub fn new(cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx: Mutex::new(rx), cancel }
    }

    /// Delivers one connection. Completes only once a consumer accepted it;
    /// fails when the listener was closed before that happened.
    pub async fn send(&self, conn: BridgeConn) -> Result<(), BridgeError> {
        let (accepted_tx, accepted_rx) = oneshot::channel();
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(BridgeError::Closed),
            sent = self.tx.send((conn, accepted_tx)) => {
                sent.map_err(|_| BridgeError::Closed)?;
            }
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(BridgeError::Closed),
            accepted = accepted_rx => accepted.map_err(|_| BridgeError::Closed),
        }
    }

    /// Yields the next delivered connection. Fails once the listener is
    /// closed or the owning scope is cancelled.
    pub async fn accept(&self) -> Result<BridgeConn, BridgeError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(BridgeError::Closed),
            delivered = rx.recv() => match delivered {
                Some((conn, accepted_tx)) => {
                    let _ = accepted_tx.send(());
                    Ok(conn)
                }
                None => Err(BridgeError::Closed),
            }
        }
    }

    /// Fails all current and future `accept` and `send` calls.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}
