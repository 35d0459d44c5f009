use tracing::info;

use crate::error::SeqError;
use crate::kv::KvStore;

/// Durable count of upstream records already committed.
///
/// Advanced only by the harvester, and only after the page it counts has been
/// fully stored.
#[derive(Clone)]
pub struct CursorStore<K: KvStore> {
    kv: K,
    key: String,
}

impl<K: KvStore> CursorStore<K> {
    pub fn new(kv: K, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    /// Reads the cursor, initialising it to 0 when the key is absent.
    pub fn load(&self) -> Result<u64, SeqError> {
        match self.kv.get_int(&self.key)? {
            Some(value) => to_offset(value),
            None => {
                self.kv
                    .set_int(&self.key, 0)
                    .map_err(|err| SeqError::CursorAdvanceFailed(err.to_string()))?;
                info!(key = %self.key, "no cursor value, initialised to 0");
                Ok(0)
            }
        }
    }

    /// Reads the cursor without initialising it.
    pub fn current(&self) -> Result<u64, SeqError> {
        self.kv.get_int(&self.key)?.map_or(Ok(0), to_offset)
    }

    /// Atomically adds `count` and returns the new cursor.
    pub fn advance(&self, count: usize) -> Result<u64, SeqError> {
        let delta = i64::try_from(count)
            .map_err(|_| SeqError::CursorAdvanceFailed(format!("batch too large: {count}")))?;
        let value = self
            .kv
            .incr_by(&self.key, delta)
            .map_err(|err| SeqError::CursorAdvanceFailed(err.to_string()))?;
        to_offset(value).map_err(|err| SeqError::CursorAdvanceFailed(err.to_string()))
    }
}

fn to_offset(value: i64) -> Result<u64, SeqError> {
    u64::try_from(value)
        .map_err(|_| SeqError::CursorAdvanceFailed(format!("negative cursor value: {value}")))
}
