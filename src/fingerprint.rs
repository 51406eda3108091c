//! SHA-256 content fingerprints.

use narrate_common::PhaseTexts;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `text`.
pub fn text_fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Fingerprint over all four phase texts in narrative order.
///
/// Each text is length-prefixed so moving content between phases changes the digest.
pub fn narrative_fingerprint(phases: &PhaseTexts) -> String {
    let mut hasher = Sha256::new();
    for (phase, text) in phases.iter() {
        hasher.update(phase.as_str().as_bytes());
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    hex::encode(hasher.finalize())
}
