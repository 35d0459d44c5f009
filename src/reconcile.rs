use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::ContentHash;
use crate::error::SeqError;
use crate::index::DedupIndex;
use crate::kv::KvStore;
use crate::search::SearchHit;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledHit {
    #[serde(flatten)]
    pub hit: SearchHit,
    pub identifiers: BTreeSet<String>,
}

/// Expands search hits back into the source identifiers behind each hash.
///
/// Output order is input order. A hash the index has not seen yet (the search
/// corpus can run ahead of or behind ingestion) yields an empty set rather
/// than an error; only an unreachable index fails the call.
#[derive(Clone)]
pub struct Reconciler<K: KvStore> {
    index: DedupIndex<K>,
}

impl<K: KvStore> Reconciler<K> {
    pub fn new(index: DedupIndex<K>) -> Self {
        Self { index }
    }

    pub fn reconcile(&self, hits: Vec<SearchHit>) -> Result<Vec<ReconciledHit>, SeqError> {
        let parsed = hits
            .iter()
            .map(|hit| match hit.hash.parse::<ContentHash>() {
                Ok(hash) => Some(hash),
                Err(_) => {
                    warn!(hash = %hit.hash, "search hit does not carry a content hash");
                    None
                }
            })
            .collect::<Vec<_>>();

        let lookups = parsed.iter().flatten().cloned().collect::<Vec<_>>();
        let mut found = self.index.identifiers_for_many(&lookups)?.into_iter();

        let mut reconciled = Vec::with_capacity(hits.len());
        for (hit, hash) in hits.into_iter().zip(parsed) {
            let identifiers = match hash {
                Some(_) => found.next().ok_or_else(|| {
                    SeqError::ReconciliationLookupFailed("lookup results exhausted".to_string())
                })?,
                None => BTreeSet::new(),
            };
            if identifiers.is_empty() {
                debug!(hash = %hit.hash, "no identifiers recorded for hit");
            }
            reconciled.push(ReconciledHit { hit, identifiers });
        }
        Ok(reconciled)
    }
}
