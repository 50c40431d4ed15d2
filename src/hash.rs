//! Content-addressed item identity.
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `input`.
pub fn content_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Stable stand-in URL for feed entries that carry no link of their own.
pub fn fallback_url(feed_url: &str, title: &str) -> String {
    format!("{}#fallback-{}", feed_url, content_hash(title))
}
