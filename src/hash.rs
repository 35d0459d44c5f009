//! Content hashing.
//!
//! The digest is SHA-1 over the UTF-8 bytes of the normalized sequence,
//! rendered as lowercase hex. It is the join key between ingestion and the
//! search corpus, so it must never change for existing data.

use sha1::{Digest, Sha1};

use crate::domain::{ContentHash, NormalizedSequence};

pub fn content_hash(sequence: &NormalizedSequence) -> ContentHash {
    let mut hasher = Sha1::new();
    hasher.update(sequence.as_str().as_bytes());
    ContentHash::from_digest(&hasher.finalize())
}
