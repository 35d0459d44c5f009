use std::collections::BTreeSet;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::config::KvKeys;
use crate::cursor::CursorStore;
use crate::domain::ContentHash;
use crate::error::SeqError;
use crate::index::DedupIndex;
use crate::kv::KvStore;
use crate::reconcile::{ReconciledHit, Reconciler};
use crate::search::SearchTool;

#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub query: String,
    pub version: String,
    pub db_sequences: Option<u64>,
    pub duration_ms: u64,
    pub num_results: usize,
    pub hits: Vec<ReconciledHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub hash: ContentHash,
    pub identifiers: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub cursor: u64,
    pub unique_sequences: u64,
}

/// Read side of the pipeline: search, reconcile and index lookups. Never
/// writes ingestion state.
#[derive(Clone)]
pub struct App<S: SearchTool, K: KvStore> {
    search: S,
    index: DedupIndex<K>,
    cursor: CursorStore<K>,
    reconciler: Reconciler<K>,
}

impl<S: SearchTool, K: KvStore + Clone> App<S, K> {
    pub fn new(search: S, kv: K, keys: &KvKeys) -> Self {
        let index = DedupIndex::new(kv.clone(), keys.clone());
        Self {
            search,
            reconciler: Reconciler::new(index.clone()),
            index,
            cursor: CursorStore::new(kv, keys.cursor_key.clone()),
        }
    }
}

impl<S: SearchTool, K: KvStore> App<S, K> {
    pub fn search(&self, query: &str) -> Result<SearchReport, SeqError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SeqError::EmptyQuery);
        }
        let started = Instant::now();
        let output = self.search.search(query)?;
        let hits = self.reconciler.reconcile(output.hits)?;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(hits = hits.len(), duration_ms, "query finished");

        Ok(SearchReport {
            query: query.to_string(),
            version: output.version,
            db_sequences: output.db_sequences,
            duration_ms,
            num_results: hits.len(),
            hits,
        })
    }

    pub fn lookup(&self, hash: &ContentHash) -> Result<LookupResult, SeqError> {
        Ok(LookupResult {
            hash: hash.clone(),
            identifiers: self.index.identifiers_for(hash)?,
        })
    }

    pub fn status(&self) -> Result<StatusResult, SeqError> {
        Ok(StatusResult {
            cursor: self.cursor.current()?,
            unique_sequences: self.index.hash_count()?,
        })
    }
}
