use sha2::{Digest, Sha256};

/// Fixed-width cache key: the first 128 bits of SHA-256, hex encoded.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..16])
}
