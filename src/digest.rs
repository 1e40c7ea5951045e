//! Content addressing for relayed messages.
//!
//! A message's document ID is the SHA-256 of the exact bytes popped from the
//! queue, before any JSON decoding. Two deliveries of byte-identical messages
//! therefore always land on the same document.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of data and returns it as a lowercase hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Derives the document ID for a raw message.
pub fn content_digest(raw: &[u8]) -> DocId {
    DocId(sha256_hex(raw))
}

/// Lowercase hex SHA-256 of a raw message, used as its storage key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
