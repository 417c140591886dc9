//! JA3 fingerprint computation.
//!
//! The legacy JA3 definition: decimal fields joined by `,`, list elements
//! joined by `-`, then an MD5 hex digest. GREASE values are not filtered.

use std::fmt::Write;

use super::client_hello::ClientHello;

/// The canonical JA3 string:
/// `<version>,<ciphers>,<extensions>,<groups>,<point_formats>`.
pub fn ja3_string(ch: &ClientHello) -> String {
    let mut out = String::new();
    let _ = write!(out, "{}", ch.legacy_version);
    out.push(',');
    push_joined(&mut out, ch.cipher_suites.iter().map(|v| *v as u64));
    out.push(',');
    push_joined(&mut out, ch.extensions.iter().map(|v| *v as u64));
    out.push(',');
    push_joined(&mut out, ch.supported_groups.iter().map(|v| *v as u64));
    out.push(',');
    push_joined(&mut out, ch.ec_point_formats.iter().map(|v| *v as u64));
    out
}

/// MD5 hex digest of the JA3 string.
pub fn ja3_digest(ch: &ClientHello) -> String {
    format!("{:x}", md5::compute(ja3_string(ch).as_bytes()))
}

fn push_joined(out: &mut String, values: impl Iterator<Item = u64>) {
    for (i, v) in values.enumerate() {
        if i != 0 {
            out.push('-');
        }
        let _ = write!(out, "{v}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_all_fields() {
        let ch = ClientHello {
            legacy_version: 771,
            cipher_suites: vec![4865, 4866, 49195],
            extensions: vec![0, 10, 11, 13, 16, 43],
            supported_groups: vec![29, 23, 24],
            ec_point_formats: vec![0],
            ..Default::default()
        };
        assert_eq!(ja3_string(&ch), "771,4865-4866-49195,0-10-11-13-16-43,29-23-24,0");
    }

    #[test]
    fn keeps_grease_values() {
        let ch = ClientHello {
            legacy_version: 771,
            cipher_suites: vec![0x0a0a, 4865],
            extensions: vec![0x1a1a, 43],
            ..Default::default()
        };
        assert_eq!(ja3_string(&ch), "771,2570-4865,6682-43,,");
    }

    #[test]
    fn empty_lists_leave_empty_fields() {
        let ch = ClientHello { legacy_version: 769, ..Default::default() };
        assert_eq!(ja3_string(&ch), "769,,,,");
    }
}
