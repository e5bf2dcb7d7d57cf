//! Content fingerprints.
//!
//! Files are identified by a hex SHA-256 of their bytes, computed by
//! streaming the file in fixed-size reads. Chunks carry a `blake3:<hex>`
//! digest of their text, used for identity and debugging only.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::defaults::HASH_BUFFER_BYTES;
use crate::error::Result;

/// Streaming SHA-256 of a file. Returns the lowercase hex digest.
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_BYTES];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of an in-memory buffer. Same output as [`hash_file`] for the same bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// BLAKE3 digest of chunk text, prefixed with the algorithm name.
pub fn chunk_hash(text: &str) -> String {
    format!("blake3:{}", blake3::hash(text.as_bytes()).to_hex())
}
