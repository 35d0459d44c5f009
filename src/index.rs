use std::collections::BTreeSet;

use crate::config::KvKeys;
use crate::domain::ContentHash;
use crate::error::SeqError;
use crate::kv::KvStore;

/// Hash → source identifiers, plus the set of every hash ever seen.
///
/// Entries only grow: there is no removal operation. Write failures surface as
/// `StoreWriteFailed` and read failures as `ReconciliationLookupFailed`.
#[derive(Clone)]
pub struct DedupIndex<K: KvStore> {
    kv: K,
    keys: KvKeys,
}

impl<K: KvStore> DedupIndex<K> {
    pub fn new(kv: K, keys: KvKeys) -> Self {
        Self { kv, keys }
    }

    pub fn identifiers_key(&self, hash: &ContentHash) -> String {
        format!("{}:{}", self.keys.sequence_prefix, hash)
    }

    pub fn has_hash(&self, hash: &ContentHash) -> Result<bool, SeqError> {
        self.kv
            .sismember(&self.keys.dedup_set_key, hash.as_str())
            .map_err(|err| SeqError::ReconciliationLookupFailed(err.to_string()))
    }

    /// Set-union insert. Returns `true` when `identifier` was not yet recorded
    /// for `hash`.
    pub fn add_identifier(&self, hash: &ContentHash, identifier: &str) -> Result<bool, SeqError> {
        self.kv
            .sadd(&self.keys.dedup_set_key, hash.as_str())
            .map_err(|err| SeqError::StoreWriteFailed(err.to_string()))?;
        self.kv
            .sadd(&self.identifiers_key(hash), identifier)
            .map_err(|err| SeqError::StoreWriteFailed(err.to_string()))
    }

    /// Empty for an unknown hash.
    pub fn identifiers_for(&self, hash: &ContentHash) -> Result<BTreeSet<String>, SeqError> {
        self.kv
            .smembers(&self.identifiers_key(hash))
            .map(|members| members.into_iter().collect())
            .map_err(|err| SeqError::ReconciliationLookupFailed(err.to_string()))
    }

    /// One lookup per hash, answered in input order.
    pub fn identifiers_for_many(
        &self,
        hashes: &[ContentHash],
    ) -> Result<Vec<BTreeSet<String>>, SeqError> {
        let keys = hashes
            .iter()
            .map(|hash| self.identifiers_key(hash))
            .collect::<Vec<_>>();
        let sets = self
            .kv
            .smembers_many(&keys)
            .map_err(|err| SeqError::ReconciliationLookupFailed(err.to_string()))?;
        if sets.len() != hashes.len() {
            return Err(SeqError::ReconciliationLookupFailed(format!(
                "expected {} identifier sets, got {}",
                hashes.len(),
                sets.len()
            )));
        }
        Ok(sets
            .into_iter()
            .map(|members| members.into_iter().collect())
            .collect())
    }

    pub fn hash_count(&self) -> Result<u64, SeqError> {
        self.kv
            .scard(&self.keys.dedup_set_key)
            .map_err(|err| SeqError::ReconciliationLookupFailed(err.to_string()))
    }
}
