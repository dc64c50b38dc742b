//! Bitcoin hashing utilities.

use sha2::{Digest, Sha256};

/// A 256-bit hash
pub type Hash256 = [u8; 32];

/// Single SHA256 hash
pub fn sha256(data: &[u8]) -> Hash256 {
    Sha256::digest(data).into()
}

/// A standard Double-SHA256 is SHA256(SHA256(data)).
pub fn sha256d(data: &[u8]) -> Hash256 {
    Sha256::digest(Sha256::digest(data)).into()
}

/// BIP-340 tagged hash: SHA256(SHA256(tag) || SHA256(tag) || data).
pub fn tagged_hash(tag: &str, data: &[u8]) -> Hash256 {
    let tag_hash = sha256(tag.as_bytes());
    let mut engine = Sha256::new();
    engine.update(tag_hash);
    engine.update(tag_hash);
    engine.update(data);
    engine.finalize().into()
}
