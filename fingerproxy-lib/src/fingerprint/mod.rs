pub mod client_hello;
pub mod injector;
pub mod ja3;
pub mod ja4;

pub use client_hello::{is_grease, parse as parse_client_hello, ClientHello};
pub use injector::{
    default_header_injectors, ja3_fingerprint, ja4_fingerprint, make_http2_fingerprint,
    FingerprintHeaderInjector, HeaderInjector,
};
pub use ja3::{ja3_digest, ja3_string};
pub use ja4::{ja4_string, Transport};

use thiserror::Error;

/// Errors produced while computing a fingerprint for one request
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("cannot parse client hello: {0}")]
    ClientHelloParse(String),

    #[error("no fingerprinting metadata attached to the request")]
    NoContextMetadata,
}
