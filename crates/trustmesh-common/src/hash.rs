//! Canonical config hashing.
//!
//! Rendered configs are hashed and the hash is stamped onto the consuming
//! workload's pod template, so a content change rolls the pods. The hash is
//! taken over the whitespace-trimmed bytes so that re-renders of unchanged
//! input stay byte-stable regardless of trailing newlines.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of the trimmed input.
pub fn config_hash(data: &str) -> String {
    let normalized = data.trim();
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)
}
