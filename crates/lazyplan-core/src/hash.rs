//! Stable hashing helpers for plan fingerprints and content-addressed results.

use blake3::Hasher;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        // blake3 hex(32b) is 64 hex chars
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }

    /// First 12 hex chars; enough to tell plans apart in logs and `explain`.
    pub fn short(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(12);
        s
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    let out = h.finalize();
    Hash256(out.into())
}

pub fn hash_str(s: &str) -> Hash256 {
    hash_bytes(s.as_bytes())
}

/// Hash any serde-serializable value deterministically (via JSON).
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256, crate::error::Error> {
    let bytes = serde_json::to_vec(v).map_err(|e| crate::error::Error::Hash(e.to_string()))?;
    Ok(hash_bytes(&bytes))
}

/// Fold a node kind, its serialized parameters and its children's fingerprints
/// into one structural fingerprint.
pub fn hash_node<P: Serialize>(
    kind: &str,
    params: &P,
    children: &[Hash256],
) -> Result<Hash256, crate::error::Error> {
    let params = serde_json::to_vec(params).map_err(|e| crate::error::Error::Hash(e.to_string()))?;
    let mut h = Hasher::new();
    h.update(kind.as_bytes());
    h.update(&[0u8]);
    h.update(&(params.len() as u64).to_le_bytes());
    h.update(&params);
    h.update(&(children.len() as u64).to_le_bytes());
    for c in children {
        h.update(&c.0);
    }
    Ok(Hash256(h.finalize().into()))
}
