//! # ContentFingerprinter
//!
//! Stable SHA-256 fingerprint over the identity of a generated write.
//! Each field is length-prefixed so ("ab", "c") and ("a", "bc") differ.

use ra_core::SourceChannel;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Deterministic, order-sensitive and whitespace-significant.
pub fn fingerprint(
    workspace_id: Uuid,
    post_id: Uuid,
    agent_id: Uuid,
    source: SourceChannel,
    body: &str,
) -> String {
    let mut hasher = Sha256::new();
    for field in [
        workspace_id.as_bytes().as_slice(),
        post_id.as_bytes().as_slice(),
        agent_id.as_bytes().as_slice(),
        source.as_str().as_bytes(),
        body.as_bytes(),
    ] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}
