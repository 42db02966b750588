use std::io::{Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::C4ghConfig;

const MAGIC: &[u8; 8] = b"crypt4gh";
const VERSION: u32 = 1;

/// Header packets are a few hundred bytes; anything near this bound is a
/// corrupt length field, not a real packet.
const MAX_PACKET_LEN: u32 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum C4ghError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic bytes, not a crypt4gh stream")]
    BadMagic,
    #[error("unsupported crypt4gh version {0}")]
    BadVersion(u32),
    #[error("implausible header packet length {0}")]
    BadPacketLength(u32),
    #[error("key: {0}")]
    Key(String),
}

/// Loads the process-global decryption key. The key list shape is what
/// `crypt4gh::decrypt` consumes.
pub fn load_private_key(config: &C4ghConfig) -> Result<Vec<crypt4gh::Keys>, C4ghError> {
    let passphrase = config.passphrase.clone();

    let seckey = crypt4gh::keys::get_private_key(
        Path::new(&config.key_path),
        Box::new(move || Ok(passphrase.clone())),
    )
    .map_err(|e| C4ghError::Key(e.to_string()))?;

    Ok(vec![crypt4gh::Keys {
        method: 0,
        privkey: seckey,
        recipient_pubkey: vec![],
    }])
}

/// Splits the header block off the front of a crypt4gh stream and returns
/// its raw bytes, leaving the reader positioned at the first data segment.
/// Only the length framing is interpreted here; packet contents stay opaque
/// to everything but the crypt4gh library.
pub async fn read_header<R>(reader: &mut R) -> Result<Vec<u8>, C4ghError>
where
    R: AsyncRead + Unpin,
{
    let mut header = Vec::with_capacity(1024);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).await?;
    if &magic != MAGIC {
        return Err(C4ghError::BadMagic);
    }
    header.extend_from_slice(&magic);

    let mut word = [0u8; 4];

    reader.read_exact(&mut word).await?;
    let version = u32::from_le_bytes(word);
    if version != VERSION {
        return Err(C4ghError::BadVersion(version));
    }
    header.extend_from_slice(&word);

    reader.read_exact(&mut word).await?;
    let packet_count = u32::from_le_bytes(word);
    header.extend_from_slice(&word);

    for _ in 0..packet_count {
        reader.read_exact(&mut word).await?;
        let packet_len = u32::from_le_bytes(word);
        // The length field counts itself.
        if !(4..=MAX_PACKET_LEN).contains(&packet_len) {
            return Err(C4ghError::BadPacketLength(packet_len));
        }
        header.extend_from_slice(&word);

        let mut packet = vec![0u8; packet_len as usize - 4];
        reader.read_exact(&mut packet).await?;
        header.extend_from_slice(&packet);
    }

    Ok(header)
}

/// A reader that feeds everything it passes through into a SHA-256 hasher.
/// Verify wraps the archive object with this so the encrypted checksum
/// comes from the very same read that is being decrypted.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn into_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);

        Ok(n)
    }
}

/// Digests of a plaintext stream that was hashed and discarded.
#[derive(Debug, Clone)]
pub struct PlaintextDigests {
    pub size: i64,
    pub sha256: String,
    pub md5: String,
}

/// A write sink that hashes and counts the plaintext without keeping any of
/// it. Both digests come from the same pass.
pub struct DigestSink {
    sha256: Sha256,
    md5: md5::Context,
    count: u64,
}

impl DigestSink {
    pub fn new() -> Self {
        Self {
            sha256: Sha256::new(),
            md5: md5::Context::new(),
            count: 0,
        }
    }

    pub fn finish(self) -> PlaintextDigests {
        PlaintextDigests {
            size: self.count as i64,
            sha256: hex::encode(self.sha256.finalize()),
            md5: format!("{:x}", self.md5.compute()),
        }
    }
}

impl Default for DigestSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for DigestSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.sha256.update(buf);
        self.md5.consume(buf);
        self.count += buf.len() as u64;

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests;
