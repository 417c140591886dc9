//! JA4 fingerprint computation.
//!
//! `<JA4_a>_<JA4_b>_<JA4_c>` where JA4_a is a readable summary and the b/c
//! parts are truncated sha256 digests. GREASE values are excluded
//! everywhere; SNI and ALPN are additionally excluded from the JA4_c hash
//! input.

use std::fmt::Write;

use sha2::{Digest, Sha256};

use super::client_hello::{is_grease, ClientHello, EXT_ALPN, EXT_SERVER_NAME};

/// Transport the ClientHello arrived over. Only TCP is terminated today;
/// the QUIC variant exists so callers can widen later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Quic,
}

impl Transport {
    fn letter(self) -> char {
        match self {
            Transport::Tcp => 't',
            Transport::Quic => 'q',
        }
    }
}

/// Computes the full JA4 string.
pub fn ja4_string(ch: &ClientHello, transport: Transport) -> String {
    let mut out = String::with_capacity(36);
    push_ja4_a(&mut out, ch, transport);
    out.push('_');
    out.push_str(&ja4_b(ch));
    out.push('_');
    out.push_str(&ja4_c(ch));
    out
}

fn push_ja4_a(out: &mut String, ch: &ClientHello, transport: Transport) {
    out.push(transport.letter());
    out.push_str(tls_version_code(ch));
    out.push(if ch.has_sni() { 'd' } else { 'i' });

    let ciphers = ch.cipher_suites.iter().filter(|c| !is_grease(**c)).count();
    let extensions = ch.extensions.iter().filter(|e| !is_grease(**e)).count();
    let _ = write!(out, "{ciphers:02}{extensions:02}");

    out.push_str(&first_alpn(ch));
}

/// Version comes from the highest non-GREASE supported_versions entry when
/// the extension is present, otherwise from legacy_version.
fn tls_version_code(ch: &ClientHello) -> &'static str {
    let version = ch
        .supported_versions
        .iter()
        .copied()
        .filter(|v| !is_grease(*v))
        .max()
        .unwrap_or(ch.legacy_version);
    match version {
        0x0304 => "13",
        0x0303 => "12",
        0x0302 => "11",
        0x0301 => "10",
        _ => "00",
    }
}

fn first_alpn(ch: &ClientHello) -> String {
    let Some(alpn) = ch.alpn_protocols.first().filter(|a| !a.is_empty()) else {
        return "00".to_string();
    };
    let bytes = alpn.as_bytes();
    if bytes[0] > 127 {
        return "99".to_string();
    }
    if bytes.len() > 2 {
        let first = bytes[0] as char;
        let last = bytes[bytes.len() - 1] as char;
        format!("{first}{last}")
    } else {
        alpn.clone()
    }
}

/// Truncated sha256 over non-GREASE cipher suites, sorted ascending,
/// hex-formatted and comma-joined.
fn ja4_b(ch: &ClientHello) -> String {
    let mut ciphers: Vec<u16> = ch
        .cipher_suites
        .iter()
        .copied()
        .filter(|c| !is_grease(*c))
        .collect();
    ciphers.sort_unstable();
    truncated_sha256(&join_hex(&ciphers))
}

/// Truncated sha256 over `<extensions>_<signature_algorithms>`. Extensions
/// exclude GREASE, SNI and ALPN and are sorted; signature algorithms keep
/// their original order. Without signature algorithms the extensions are
/// hashed alone.
fn ja4_c(ch: &ClientHello) -> String {
    let mut extensions: Vec<u16> = ch
        .extensions
        .iter()
        .copied()
        .filter(|e| !is_grease(*e) && *e != EXT_SERVER_NAME && *e != EXT_ALPN)
        .collect();
    extensions.sort_unstable();

    let input = if ch.signature_algorithms.is_empty() {
        join_hex(&extensions)
    } else {
        format!("{}_{}", join_hex(&extensions), join_hex(&ch.signature_algorithms))
    };
    truncated_sha256(&input)
}

fn join_hex(values: &[u16]) -> String {
    let mut out = String::with_capacity(values.len() * 5);
    for (i, v) in values.iter().enumerate() {
        if i != 0 {
            out.push(',');
        }
        let _ = write!(out, "{v:04x}");
    }
    out
}

fn truncated_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(12);
    hex
}
