use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SeqError;

pub const CONTENT_HASH_LEN: usize = 40;

/// One record as returned by the upstream source. Only its hash projection
/// outlives the harvester cycle that parsed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub identifier: String,
    pub raw_sequence: String,
    pub created_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn normalized(&self) -> NormalizedSequence {
        NormalizedSequence::new(&self.raw_sequence)
    }
}

/// Lower-cased sequence; the value that is hashed and stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedSequence(String);

impl NormalizedSequence {
    pub fn new(raw: &str) -> Self {
        Self(raw.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 40 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = SeqError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let is_valid = normalized.len() == CONTENT_HASH_LEN
            && normalized.chars().all(|ch| ch.is_ascii_hexdigit());
        if !is_valid {
            return Err(SeqError::InvalidContentHash(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = SeqError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

/// `{limit, offset}` sent to the upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: u64,
}
