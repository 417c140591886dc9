use std::path::PathBuf;

/// TLS termination configuration
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain
    pub cert_path: PathBuf,
    /// Path to the PEM private key
    pub key_path: PathBuf,
    /// Watch the certificate files and reload on change
    pub watch: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("tls.crt"),
            key_path: PathBuf::from("tls.key"),
            watch: true,
        }
    }
}
