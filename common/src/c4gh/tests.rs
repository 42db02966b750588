use std::collections::HashSet;
use std::io::Read as _;

use super::*;

fn synthetic_header(packets: &[&[u8]]) -> Vec<u8> {
    let mut header = Vec::new();
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&VERSION.to_le_bytes());
    header.extend_from_slice(&(packets.len() as u32).to_le_bytes());
    for packet in packets {
        header.extend_from_slice(&(packet.len() as u32 + 4).to_le_bytes());
        header.extend_from_slice(packet);
    }
    header
}

#[tokio::test]
async fn test_read_header_round_trip() {
    let header = synthetic_header(&[b"first packet", b"second"]);

    let mut stream = Vec::new();
    stream.extend_from_slice(&header);
    stream.extend_from_slice(b"BODY BYTES");

    let mut reader = stream.as_slice();
    let parsed = read_header(&mut reader).await.expect("header should parse");

    assert_eq!(parsed, header);
    assert_eq!(reader, b"BODY BYTES");
}

#[tokio::test]
async fn test_read_header_bad_magic() {
    let mut stream = synthetic_header(&[b"packet"]);
    stream[0] = b'x';

    let mut reader = stream.as_slice();
    assert!(matches!(
        read_header(&mut reader).await,
        Err(C4ghError::BadMagic)
    ));
}

#[tokio::test]
async fn test_read_header_bad_version() {
    let mut stream = synthetic_header(&[b"packet"]);
    stream[8] = 2;

    let mut reader = stream.as_slice();
    assert!(matches!(
        read_header(&mut reader).await,
        Err(C4ghError::BadVersion(2))
    ));
}

#[tokio::test]
async fn test_read_header_implausible_packet() {
    let mut header = Vec::new();
    header.extend_from_slice(MAGIC);
    header.extend_from_slice(&VERSION.to_le_bytes());
    header.extend_from_slice(&1u32.to_le_bytes());
    header.extend_from_slice(&u32::MAX.to_le_bytes());

    let mut reader = header.as_slice();
    assert!(matches!(
        read_header(&mut reader).await,
        Err(C4ghError::BadPacketLength(_))
    ));
}

#[tokio::test]
async fn test_read_header_truncated() {
    let header = synthetic_header(&[b"packet"]);

    let mut reader = &header[..header.len() - 2];
    assert!(matches!(
        read_header(&mut reader).await,
        Err(C4ghError::Io(_))
    ));
}

#[test]
fn test_hashing_reader_matches_direct_digest() {
    let data = b"some archived bytes".repeat(1000);

    let mut reader = HashingReader::new(data.as_slice());
    let mut out = Vec::new();
    reader.read_to_end(&mut out).expect("read failed");

    assert_eq!(out, data);
    assert_eq!(reader.into_hex(), hex::encode(Sha256::digest(&data)));
}

#[test]
fn test_digest_sink_empty() {
    let digests = DigestSink::new().finish();

    assert_eq!(digests.size, 0);
    assert_eq!(
        digests.sha256,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(digests.md5, "d41d8cd98f00b204e9800998ecf8427e");
}

#[test]
fn test_digest_sink_counts_and_hashes() {
    let data = b"plaintext under test".repeat(333);

    let mut sink = DigestSink::new();
    std::io::copy(&mut data.as_slice(), &mut sink).expect("copy failed");
    let digests = sink.finish();

    assert_eq!(digests.size, data.len() as i64);
    assert_eq!(digests.sha256, hex::encode(Sha256::digest(&data)));
    assert_eq!(digests.md5, format!("{:x}", md5::compute(&data)));
}

fn test_keys(dir: &std::path::Path) -> (Vec<crypt4gh::Keys>, HashSet<crypt4gh::Keys>) {
    let sk_path = dir.join("test.sec.pem");
    let pk_path = dir.join("test.pub.pem");

    crypt4gh::keys::generate_keys(&sk_path, &pk_path, Box::new(|| Ok(String::new())), None)
        .expect("failed to generate keys");

    let seckey = crypt4gh::keys::get_private_key(&sk_path, Box::new(|| Ok(String::new())))
        .expect("failed to load private key");
    let pubkey = crypt4gh::keys::get_public_key(&pk_path).expect("failed to load public key");

    let decrypt_keys = vec![crypt4gh::Keys {
        method: 0,
        privkey: seckey.clone(),
        recipient_pubkey: vec![],
    }];
    let recipient_keys = HashSet::from([crypt4gh::Keys {
        method: 0,
        privkey: seckey,
        recipient_pubkey: pubkey,
    }]);

    (decrypt_keys, recipient_keys)
}

/// Encrypt a buffer, split the header off the way ingest does, then run the
/// verify topology: hash the stored bytes while decrypting and hashing the
/// plaintext, all in one pass.
#[tokio::test]
async fn test_decrypt_topology_round_trip() {
    let tmp_dir = tempfile::tempdir().expect("failed to create temp dir");
    let (decrypt_keys, recipient_keys) = test_keys(tmp_dir.path());

    let plaintext = b"the quick brown fox jumps over the lazy dog\n".repeat(4096);

    let mut encrypted = Vec::new();
    crypt4gh::encrypt(
        &recipient_keys,
        &mut plaintext.as_slice(),
        &mut encrypted,
        0,
        None,
    )
    .expect("failed to encrypt");

    let mut reader = encrypted.as_slice();
    let header = read_header(&mut reader).await.expect("failed to split header");
    let body = reader.to_vec();
    assert_eq!(header.len() + body.len(), encrypted.len());

    let mut hashing = HashingReader::new(body.as_slice());
    let mut stream = std::io::Read::chain(std::io::Cursor::new(header), &mut hashing);
    let mut sink = DigestSink::new();

    crypt4gh::decrypt(&decrypt_keys, &mut stream, &mut sink, 0, None, &None)
        .expect("failed to decrypt");
    drop(stream);

    assert_eq!(hashing.into_hex(), hex::encode(Sha256::digest(&body)));

    let digests = sink.finish();
    assert_eq!(digests.size, plaintext.len() as i64);
    assert_eq!(digests.sha256, hex::encode(Sha256::digest(&plaintext)));
    assert_eq!(digests.md5, format!("{:x}", md5::compute(&plaintext)));
}
