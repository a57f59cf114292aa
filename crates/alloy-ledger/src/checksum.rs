use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of a file, hex-encoded lowercase.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for checksum: {}", path.display()))?;
    hash_stream(&mut file)
}

/// Computes the SHA-256 digest of everything a reader yields.
pub fn hash_stream<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let read = reader
            .read(&mut buf)
            .context("failed reading stream for checksum")?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Computes the SHA-256 digest of a byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Re-hashes the file and compares against an expected hex digest. I/O
/// failures propagate as errors, never as a mismatch.
pub fn verify(path: &Path, expected: &str) -> Result<bool> {
    let actual = hash_file(path)?;
    Ok(actual.eq_ignore_ascii_case(expected))
}
