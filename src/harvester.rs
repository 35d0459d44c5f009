//! Cursor-driven ingestion loop.
//!
//! One cycle walks `Idle → Fetching → Parsing → Storing → Advancing` and the
//! run loop then sleeps. The cursor is read back from the key-value store at
//! the start of every cycle and advanced only once every record of the page
//! has been written, so an interrupted cycle is simply redone from the same
//! offset. Storing is idempotent (hash-keyed files and set-union), which makes
//! the redo safe.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{HarvestSettings, KvKeys};
use crate::cursor::CursorStore;
use crate::domain::{PageRequest, SourceRecord};
use crate::error::SeqError;
use crate::hash::content_hash;
use crate::index::DedupIndex;
use crate::kv::KvStore;
use crate::scheduler::{Scheduler, SleepOutcome};
use crate::sequences::SequenceStore;
use crate::sparql::{UpstreamSource, parse_results};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestPhase {
    Idle,
    Fetching,
    Parsing,
    Storing,
    Advancing,
    Sleeping,
}

impl fmt::Display for HarvestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HarvestPhase::Idle => "idle",
            HarvestPhase::Fetching => "fetching",
            HarvestPhase::Parsing => "parsing",
            HarvestPhase::Storing => "storing",
            HarvestPhase::Advancing => "advancing",
            HarvestPhase::Sleeping => "sleeping",
        };
        write!(f, "{name}")
    }
}

/// Poll fast while a backlog exists, slowly once a partial page shows the
/// upstream is drained.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub page_size: usize,
    pub short_delay: Duration,
    pub long_delay: Duration,
}

impl BackoffPolicy {
    pub fn from_settings(settings: &HarvestSettings) -> Self {
        Self {
            page_size: settings.page_size,
            short_delay: settings.short_delay,
            long_delay: settings.long_delay,
        }
    }

    pub fn is_drained(&self, fetched: usize) -> bool {
        fetched < self.page_size
    }

    pub fn delay_for(&self, fetched: usize) -> Duration {
        if self.is_drained(fetched) {
            self.long_delay
        } else {
            self.short_delay
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Cursor value the page was fetched at.
    pub offset: u64,
    pub fetched: usize,
    /// Sequence files written by this cycle.
    pub new_sequences: usize,
    /// Identifiers that were not yet recorded for their hash.
    pub new_identifiers: usize,
    /// Cursor value after advancing.
    pub cursor: u64,
    pub drained: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestSummary {
    pub cycles: usize,
    pub fetched: usize,
    pub new_sequences: usize,
    pub cursor: u64,
}

impl HarvestSummary {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.fetched += report.fetched;
        self.new_sequences += report.new_sequences;
        self.cursor = report.cursor;
    }
}

#[derive(Debug, Default)]
struct StoreStats {
    new_sequences: usize,
    new_identifiers: usize,
}

pub struct Harvester<U: UpstreamSource, K: KvStore> {
    upstream: U,
    sequences: SequenceStore,
    index: DedupIndex<K>,
    cursor: CursorStore<K>,
    policy: BackoffPolicy,
}

impl<U: UpstreamSource, K: KvStore + Clone> Harvester<U, K> {
    pub fn new(
        upstream: U,
        kv: K,
        keys: &KvKeys,
        sequences: SequenceStore,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            upstream,
            sequences,
            index: DedupIndex::new(kv.clone(), keys.clone()),
            cursor: CursorStore::new(kv, keys.cursor_key.clone()),
            policy,
        }
    }
}

impl<U: UpstreamSource, K: KvStore> Harvester<U, K> {
    /// Runs one fetch/parse/store/advance pass. Any error leaves the cursor
    /// where it was.
    pub fn run_cycle(&self) -> Result<CycleReport, SeqError> {
        let offset = self.cursor.load()?;
        let request = PageRequest {
            limit: self.policy.page_size,
            offset,
        };

        enter(HarvestPhase::Fetching);
        info!(offset, limit = request.limit, "fetching page from upstream");
        let body = self.upstream.fetch_page(request)?;

        enter(HarvestPhase::Parsing);
        let records = parse_results(&body)?;
        if records.len() > request.limit {
            return Err(SeqError::UpstreamUnavailable(format!(
                "upstream returned {} records for a limit of {}",
                records.len(),
                request.limit
            )));
        }
        debug!(records = records.len(), "parsed page");

        enter(HarvestPhase::Storing);
        let stats = self.store_page(&records)?;

        enter(HarvestPhase::Advancing);
        let cursor = if records.is_empty() {
            offset
        } else {
            info!(by = records.len(), "advancing cursor");
            self.cursor.advance(records.len())?
        };

        let report = CycleReport {
            offset,
            fetched: records.len(),
            new_sequences: stats.new_sequences,
            new_identifiers: stats.new_identifiers,
            cursor,
            drained: self.policy.is_drained(records.len()),
        };
        info!(
            fetched = report.fetched,
            new_sequences = report.new_sequences,
            cursor = report.cursor,
            "cycle committed"
        );
        enter(HarvestPhase::Idle);
        Ok(report)
    }

    /// Repeats cycles until the scheduler is cancelled. Cycle errors are
    /// returned immediately; recovery is a restart, which resumes from the
    /// durable cursor.
    pub fn run<S: Scheduler + ?Sized>(&self, scheduler: &S) -> Result<HarvestSummary, SeqError> {
        let mut summary = HarvestSummary::default();
        while !scheduler.is_cancelled() {
            let report = self.run_cycle()?;
            summary.record(&report);

            let delay = self.policy.delay_for(report.fetched);
            enter(HarvestPhase::Sleeping);
            if report.drained {
                info!(delay_secs = delay.as_secs(), "upstream drained, sleeping");
            } else {
                info!(delay_secs = delay.as_secs(), "backlog remains, polling again shortly");
            }
            if scheduler.sleep(delay) == SleepOutcome::Cancelled {
                break;
            }
        }
        info!(cycles = summary.cycles, cursor = summary.cursor, "harvester stopped");
        Ok(summary)
    }

    fn store_page(&self, records: &[SourceRecord]) -> Result<StoreStats, SeqError> {
        let mut stats = StoreStats::default();
        for record in records {
            let sequence = record.normalized();
            let hash = content_hash(&sequence);
            if self.sequences.write_if_absent(&hash, &sequence)? {
                stats.new_sequences += 1;
            }
            if self.index.add_identifier(&hash, &record.identifier)? {
                stats.new_identifiers += 1;
            }
            debug!(%hash, identifier = %record.identifier, "stored record");
        }
        Ok(stats)
    }
}

fn enter(phase: HarvestPhase) {
    debug!(%phase, "harvester phase");
}
