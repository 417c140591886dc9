//! JA3 / JA4 vectors over synthetic ClientHello records.

use fingerproxy_lib::fingerprint::{
    ja3_digest, ja3_string, ja4_string, parse_client_hello, Transport,
};

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

struct Extension {
    id: u16,
    data: Vec<u8>,
}

fn ext(id: u16, data: Vec<u8>) -> Extension {
    Extension { id, data }
}

fn sni(host: &str) -> Extension {
    let mut data = Vec::new();
    let entry_len = 3 + host.len();
    data.extend_from_slice(&(entry_len as u16).to_be_bytes());
    data.push(0); // host_name
    data.extend_from_slice(&(host.len() as u16).to_be_bytes());
    data.extend_from_slice(host.as_bytes());
    ext(0x0000, data)
}

fn supported_groups(groups: &[u16]) -> Extension {
    let mut data = Vec::new();
    data.extend_from_slice(&((groups.len() * 2) as u16).to_be_bytes());
    for g in groups {
        data.extend_from_slice(&g.to_be_bytes());
    }
    ext(0x000a, data)
}

fn ec_point_formats(formats: &[u8]) -> Extension {
    let mut data = vec![formats.len() as u8];
    data.extend_from_slice(formats);
    ext(0x000b, data)
}

fn signature_algorithms(algos: &[u16]) -> Extension {
    let mut data = Vec::new();
    data.extend_from_slice(&((algos.len() * 2) as u16).to_be_bytes());
    for a in algos {
        data.extend_from_slice(&a.to_be_bytes());
    }
    ext(0x000d, data)
}

fn alpn(protocols: &[&str]) -> Extension {
    let mut list = Vec::new();
    for p in protocols {
        list.push(p.len() as u8);
        list.extend_from_slice(p.as_bytes());
    }
    let mut data = Vec::new();
    data.extend_from_slice(&(list.len() as u16).to_be_bytes());
    data.extend_from_slice(&list);
    ext(0x0010, data)
}

fn supported_versions(versions: &[u16]) -> Extension {
    let mut data = vec![(versions.len() * 2) as u8];
    for v in versions {
        data.extend_from_slice(&v.to_be_bytes());
    }
    ext(0x002b, data)
}

fn encode_client_hello(legacy_version: u16, ciphers: &[u16], extensions: &[Extension]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&legacy_version.to_be_bytes());
    body.extend_from_slice(&[0u8; 32]); // random
    body.push(0); // empty session id

    body.extend_from_slice(&((ciphers.len() * 2) as u16).to_be_bytes());
    for c in ciphers {
        body.extend_from_slice(&c.to_be_bytes());
    }

    body.extend_from_slice(&[1, 0]); // null compression

    let mut ext_block = Vec::new();
    for e in extensions {
        ext_block.extend_from_slice(&e.id.to_be_bytes());
        ext_block.extend_from_slice(&(e.data.len() as u16).to_be_bytes());
        ext_block.extend_from_slice(&e.data);
    }
    body.extend_from_slice(&(ext_block.len() as u16).to_be_bytes());
    body.extend_from_slice(&ext_block);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]); // u24
    handshake.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

/// TLS 1.3 hello with SNI, two ALPN protocols and signature algorithms.
fn hello_with_sni() -> Vec<u8> {
    encode_client_hello(
        0x0303,
        &[0x1301, 0x1302, 0xc02b],
        &[
            sni("example.com"),
            supported_groups(&[29, 23, 24]),
            ec_point_formats(&[0]),
            signature_algorithms(&[0x0403, 0x0804]),
            alpn(&["h2", "http/1.1"]),
            supported_versions(&[0x0304, 0x0303]),
        ],
    )
}

/// GREASEd TLS 1.3 hello without SNI and without signature algorithms.
fn greased_hello_without_sni() -> Vec<u8> {
    encode_client_hello(
        0x0303,
        &[0x0a0a, 0x1301, 0x1302, 0x1303],
        &[
            ext(0x1a1a, vec![]), // GREASE
            supported_versions(&[0x0a0a, 0x0304]),
            supported_groups(&[29, 23]),
            ec_point_formats(&[0]),
            alpn(&["h2"]),
            ext(0x0015, vec![0, 0, 0]), // padding
        ],
    )
}

#[test]
fn parses_all_relevant_fields() -> TestResult<()> {
    let ch = parse_client_hello(&hello_with_sni())?;
    assert_eq!(ch.legacy_version, 0x0303);
    assert_eq!(ch.cipher_suites, vec![0x1301, 0x1302, 0xc02b]);
    assert_eq!(ch.extensions, vec![0x0000, 0x000a, 0x000b, 0x000d, 0x0010, 0x002b]);
    assert_eq!(ch.server_name.as_deref(), Some("example.com"));
    assert_eq!(ch.alpn_protocols, vec!["h2".to_string(), "http/1.1".to_string()]);
    assert_eq!(ch.supported_groups, vec![29, 23, 24]);
    assert_eq!(ch.ec_point_formats, vec![0]);
    assert_eq!(ch.signature_algorithms, vec![0x0403, 0x0804]);
    assert_eq!(ch.supported_versions, vec![0x0304, 0x0303]);
    Ok(())
}

#[test]
fn ja3_vector_with_sni() -> TestResult<()> {
    let ch = parse_client_hello(&hello_with_sni())?;
    assert_eq!(ja3_string(&ch), "771,4865-4866-49195,0-10-11-13-16-43,29-23-24,0");
    assert_eq!(ja3_digest(&ch), "35683670fdd4638b15a66e4bed5fa266");
    Ok(())
}

#[test]
fn ja3_keeps_grease_values() -> TestResult<()> {
    let ch = parse_client_hello(&greased_hello_without_sni())?;
    assert_eq!(ja3_string(&ch), "771,2570-4865-4866-4867,6682-43-10-11-16-21,29-23,0");
    assert_eq!(ja3_digest(&ch), "dfb3539cbdf8f40ba5000b5791c3995d");
    Ok(())
}

#[test]
fn ja4_vector_with_sni() -> TestResult<()> {
    let ch = parse_client_hello(&hello_with_sni())?;
    // t: tcp, 13: supported_versions, d: sni present, 03 ciphers, 06
    // extensions, h2: first alpn
    assert_eq!(
        ja4_string(&ch, Transport::Tcp),
        "t13d0306h2_5559582ccdc4_fb71836bce29"
    );
    Ok(())
}

#[test]
fn ja4_excludes_grease_and_hashes_extensions_alone_without_sigalgs() -> TestResult<()> {
    let ch = parse_client_hello(&greased_hello_without_sni())?;
    // GREASE cipher and extension excluded from the counts; no SNI so the
    // flag is 'i'; no signature_algorithms so JA4_c hashes extensions alone
    // (sorted, minus SNI/ALPN): 000a,000b,0015,002b.
    assert_eq!(
        ja4_string(&ch, Transport::Tcp),
        "t13i0305h2_55b375c5d22e_89cdcff7706d"
    );
    Ok(())
}

#[test]
fn ja4_is_deterministic() -> TestResult<()> {
    let record = hello_with_sni();
    let a = ja4_string(&parse_client_hello(&record)?, Transport::Tcp);
    let b = ja4_string(&parse_client_hello(&record)?, Transport::Tcp);
    assert_eq!(a, b);
    Ok(())
}
