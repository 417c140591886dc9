//! TLS ClientHello parsing.
//!
//! Parses the raw record captured by the interceptor into the fields the
//! fingerprint computations need. Only the first handshake message of the
//! record is considered; it must be a ClientHello.

use super::FingerprintError;

const RECORD_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

pub const EXT_SERVER_NAME: u16 = 0x0000;
pub const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
pub const EXT_EC_POINT_FORMATS: u16 = 0x000b;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
pub const EXT_ALPN: u16 = 0x0010;
pub const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;

/// Fields of a parsed ClientHello, in transmission order where order matters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    /// legacy_version from the handshake body
    pub legacy_version: u16,
    pub cipher_suites: Vec<u16>,
    /// Extension ids in transmission order
    pub extensions: Vec<u16>,
    pub server_name: Option<String>,
    pub alpn_protocols: Vec<String>,
    pub supported_groups: Vec<u16>,
    pub ec_point_formats: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub supported_versions: Vec<u16>,
}

impl ClientHello {
    pub fn has_sni(&self) -> bool {
        self.extensions.contains(&EXT_SERVER_NAME)
    }
}

/// GREASE values share a bit pattern: both bytes equal, low nibble 0xa.
pub fn is_grease(v: u16) -> bool {
    (v >> 8) == (v & 0xff) && (v & 0xf) == 0xa
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FingerprintError> {
        if self.remaining() < n {
            return Err(FingerprintError::ClientHelloParse(format!(
                "need {n} bytes, {} left",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, FingerprintError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FingerprintError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize, FingerprintError> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }
}

/// Parses a full ClientHello record (5-byte record header included).
pub fn parse(record: &[u8]) -> Result<ClientHello, FingerprintError> {
    let mut r = Reader::new(record);

    let content_type = r.u8()?;
    if content_type != RECORD_TYPE_HANDSHAKE {
        return Err(FingerprintError::ClientHelloParse(format!(
            "record type {content_type:#04x} is not a handshake"
        )));
    }
    let _record_version = r.u16()?;
    let record_len = r.u16()? as usize;
    if r.remaining() < record_len {
        return Err(FingerprintError::ClientHelloParse(format!(
            "record length {record_len} exceeds buffer ({} left)",
            r.remaining()
        )));
    }

    let handshake_type = r.u8()?;
    if handshake_type != HANDSHAKE_TYPE_CLIENT_HELLO {
        return Err(FingerprintError::ClientHelloParse(format!(
            "handshake type {handshake_type} is not a client hello"
        )));
    }
    let body_len = r.u24()?;
    if body_len + 4 > record_len {
        return Err(FingerprintError::ClientHelloParse(
            "client hello spans multiple records".to_string(),
        ));
    }

    let mut ch = ClientHello { legacy_version: r.u16()?, ..Default::default() };

    // random
    r.take(32)?;

    let session_id_len = r.u8()? as usize;
    r.take(session_id_len)?;

    let ciphers_len = r.u16()? as usize;
    if ciphers_len % 2 != 0 {
        return Err(FingerprintError::ClientHelloParse(
            "odd cipher suite list length".to_string(),
        ));
    }
    let ciphers = r.take(ciphers_len)?;
    ch.cipher_suites = ciphers
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();

    let compression_len = r.u8()? as usize;
    r.take(compression_len)?;

    // SSL 3.0 / TLS hellos without extensions end here
    if r.remaining() == 0 {
        return Ok(ch);
    }

    let extensions_len = r.u16()? as usize;
    let mut ext = Reader::new(r.take(extensions_len)?);
    while ext.remaining() > 0 {
        let ext_id = ext.u16()?;
        let ext_len = ext.u16()? as usize;
        let data = ext.take(ext_len)?;
        ch.extensions.push(ext_id);

        match ext_id {
            EXT_SERVER_NAME => ch.server_name = parse_server_name(data),
            EXT_SUPPORTED_GROUPS => ch.supported_groups = parse_u16_list(data)?,
            EXT_EC_POINT_FORMATS => ch.ec_point_formats = parse_u8_list(data)?,
            EXT_SIGNATURE_ALGORITHMS => ch.signature_algorithms = parse_u16_list(data)?,
            EXT_ALPN => ch.alpn_protocols = parse_alpn(data)?,
            EXT_SUPPORTED_VERSIONS => ch.supported_versions = parse_supported_versions(data)?,
            _ => {}
        }
    }

    Ok(ch)
}

fn parse_server_name(data: &[u8]) -> Option<String> {
    let mut r = Reader::new(data);
    let list_len = r.u16().ok()? as usize;
    let mut list = Reader::new(r.take(list_len).ok()?);
    while list.remaining() > 0 {
        let name_type = list.u8().ok()?;
        let name_len = list.u16().ok()? as usize;
        let name = list.take(name_len).ok()?;
        // host_name
        if name_type == 0 {
            return String::from_utf8(name.to_vec()).ok();
        }
    }
    None
}

fn parse_u16_list(data: &[u8]) -> Result<Vec<u16>, FingerprintError> {
    let mut r = Reader::new(data);
    let list_len = r.u16()? as usize;
    let list = r.take(list_len)?;
    Ok(list
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

fn parse_u8_list(data: &[u8]) -> Result<Vec<u8>, FingerprintError> {
    let mut r = Reader::new(data);
    let list_len = r.u8()? as usize;
    Ok(r.take(list_len)?.to_vec())
}

fn parse_supported_versions(data: &[u8]) -> Result<Vec<u16>, FingerprintError> {
    let mut r = Reader::new(data);
    let list_len = r.u8()? as usize;
    let list = r.take(list_len)?;
    Ok(list
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

fn parse_alpn(data: &[u8]) -> Result<Vec<String>, FingerprintError> {
    let mut r = Reader::new(data);
    let list_len = r.u16()? as usize;
    let mut list = Reader::new(r.take(list_len)?);
    let mut protocols = Vec::new();
    while list.remaining() > 0 {
        let len = list.u8()? as usize;
        let name = list.take(len)?;
        protocols.push(String::from_utf8_lossy(name).into_owned());
    }
    Ok(protocols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grease_bit_pattern() {
        for v in [0x0a0a, 0x1a1a, 0x2a2a, 0xfafa] {
            assert!(is_grease(v), "{v:#06x} should be GREASE");
        }
        for v in [0x1301, 0x0a1a, 0x1a0a, 0x00ff, 0x0a0b] {
            assert!(!is_grease(v), "{v:#06x} should not be GREASE");
        }
    }

    #[test]
    fn rejects_non_handshake_record() {
        let err = parse(&[0x17, 0x03, 0x03, 0x00, 0x01, 0x00]).unwrap_err();
        assert!(err.to_string().contains("not a handshake"));
    }

    #[test]
    fn rejects_truncated_record() {
        assert!(parse(&[0x16, 0x03, 0x01, 0x40, 0x00, 0x01]).is_err());
    }
}
