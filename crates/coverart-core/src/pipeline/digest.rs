//! Content keys derived from source URLs.

use sha2::{Digest as _, Sha256};
use std::fmt;

/// Number of hex characters kept from the SHA-256 of the source URL.
pub const DIGEST_LEN: usize = 20;

/// Content-addressing key for every artifact derived from one source image.
///
/// Computed over the raw URL string (query string included, no
/// normalisation), so the same URL always lands on the same storage keys,
/// across records and across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    /// Derive the digest for a source URL.
    pub fn from_source_url(source_url: &str) -> Self {
        let hash = Sha256::digest(source_url.as_bytes());
        let mut hex = hex::encode(hash);
        hex.truncate(DIGEST_LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
