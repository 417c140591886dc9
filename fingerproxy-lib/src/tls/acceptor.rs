use std::sync::Arc;

use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::error::Result;

use super::reloader::{load_certified_key, spawn_cert_reloader, ReloadingCertResolver};

/// Builds the TLS acceptor: ALPN h2 + http/1.1, certificate served through
/// the reloading resolver.
pub fn build_tls_acceptor(cfg: &TlsConfig) -> Result<TlsAcceptor> {
    let certified_key = load_certified_key(&cfg.cert_path, &cfg.key_path)?;
    let resolver = Arc::new(ReloadingCertResolver::new(certified_key));

    if cfg.watch {
        spawn_cert_reloader(Arc::clone(&resolver), cfg.clone())?;
    }

    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    server.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server)))
}
