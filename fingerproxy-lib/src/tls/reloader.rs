//! Certificate loading and hot reload.
//!
//! The server's rustls config holds a [`ReloadingCertResolver`] instead of a
//! fixed certificate: an `ArcSwap` of the current `CertifiedKey`, replaced
//! in the background whenever the certificate files change on disk. A
//! failed reload keeps the previous certificate.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::crypto::aws_lc_rs;
use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::CertifiedKey;
use tracing::{info, warn};

use crate::config::TlsConfig;
use crate::error::{ProxyError, Result};

pub struct ReloadingCertResolver {
    current: ArcSwap<CertifiedKey>,
}

impl ReloadingCertResolver {
    pub fn new(initial: CertifiedKey) -> Self {
        Self { current: ArcSwap::from_pointee(initial) }
    }

    pub fn store(&self, certified_key: CertifiedKey) {
        self.current.store(Arc::new(certified_key));
    }
}

impl std::fmt::Debug for ReloadingCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadingCertResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for ReloadingCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.current.load_full())
    }
}

/// Reads the PEM certificate chain and private key from disk.
pub fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey> {
    let cert_bytes = std::fs::read(cert_path).map_err(|e| {
        ProxyError::Tls(format!("Unable to load the certificates [{}]: {e}", cert_path.display()))
    })?;
    let certs = CertificateDer::pem_slice_iter(&cert_bytes)
        .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
        .map_err(|e| ProxyError::Tls(format!("Unable to parse the certificates: {e}")))?;
    if certs.is_empty() {
        return Err(ProxyError::Tls(format!(
            "No certificates found in [{}]",
            cert_path.display()
        )));
    }

    let key_bytes = std::fs::read(key_path).map_err(|e| {
        ProxyError::Tls(format!("Unable to load the certificate key [{}]: {e}", key_path.display()))
    })?;
    let mut keys: Vec<PrivateKeyDer<'static>> = PrivateKeyDer::pem_slice_iter(&key_bytes)
        .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
        .map_err(|e| ProxyError::Tls(format!("Unable to parse the private keys: {e}")))?;
    let key = keys.pop().ok_or(ProxyError::NoPrivateKey)?;

    let signing_key = aws_lc_rs::default_provider()
        .key_provider
        .load_private_key(key)
        .map_err(|e| ProxyError::Tls(format!("Unsupported private key: {e}")))?;

    Ok(CertifiedKey::new(certs, signing_key))
}

/// Watches the certificate files and swaps the resolver's key on change.
/// Watching the parent directories covers atomic-rename updates (kubernetes
/// secret mounts).
pub(crate) fn spawn_cert_reloader(
    resolver: Arc<ReloadingCertResolver>,
    cfg: TlsConfig,
) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if event.is_ok() {
            let _ = tx.try_send(());
        }
    })
    .map_err(|e| ProxyError::Tls(format!("Failed to create certificate watcher: {e}")))?;

    let mut watched: HashSet<PathBuf> = HashSet::new();
    for path in [&cfg.cert_path, &cfg.key_path] {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        if watched.insert(dir.clone()) {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    ProxyError::Tls(format!("Failed to watch [{}]: {e}", dir.display()))
                })?;
        }
    }

    tokio::spawn(async move {
        // the watcher lives as long as this task
        let _watcher = watcher;
        while rx.recv().await.is_some() {
            // settle down bursts of events from one certificate rotation
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            while rx.try_recv().is_ok() {}

            match load_certified_key(&cfg.cert_path, &cfg.key_path) {
                Ok(certified_key) => {
                    resolver.store(certified_key);
                    info!("certificate reloaded");
                }
                Err(e) => {
                    warn!(error = %e, "certificate reload failed, keeping current certificate");
                }
            }
        }
    });

    Ok(())
}
