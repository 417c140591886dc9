pub mod acceptor;
pub mod reloader;

pub use acceptor::build_tls_acceptor;
pub use reloader::{load_certified_key, ReloadingCertResolver};
