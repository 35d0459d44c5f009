//! Key-value store seam used for the cursor and the dedup index.
//!
//! Only the commands the pipeline needs are exposed: integer get/set/incr and
//! set add/read. Any store with atomic counters and set semantics will do.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use redis::Commands;
use tracing::{debug, warn};

use crate::error::SeqError;

pub const MEMORY_URL: &str = "memory://";

pub trait KvStore: Send + Sync {
    fn get_int(&self, key: &str) -> Result<Option<i64>, SeqError>;
    fn set_int(&self, key: &str, value: i64) -> Result<(), SeqError>;
    /// Returns the value after the increment.
    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, SeqError>;
    /// Returns `true` when the member was newly added.
    fn sadd(&self, key: &str, member: &str) -> Result<bool, SeqError>;
    fn sismember(&self, key: &str, member: &str) -> Result<bool, SeqError>;
    fn smembers(&self, key: &str) -> Result<Vec<String>, SeqError>;
    fn scard(&self, key: &str) -> Result<u64, SeqError>;

    /// Members of several sets, in key order. Backends that can pipeline
    /// should override this.
    fn smembers_many(&self, keys: &[String]) -> Result<Vec<Vec<String>>, SeqError> {
        keys.iter().map(|key| self.smembers(key)).collect()
    }
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn get_int(&self, key: &str) -> Result<Option<i64>, SeqError> {
        (**self).get_int(key)
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), SeqError> {
        (**self).set_int(key, value)
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, SeqError> {
        (**self).incr_by(key, delta)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        (**self).sadd(key, member)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        (**self).sismember(key, member)
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, SeqError> {
        (**self).smembers(key)
    }

    fn scard(&self, key: &str) -> Result<u64, SeqError> {
        (**self).scard(key)
    }

    fn smembers_many(&self, keys: &[String]) -> Result<Vec<Vec<String>>, SeqError> {
        (**self).smembers_many(keys)
    }
}

impl<T: KvStore + ?Sized> KvStore for &T {
    fn get_int(&self, key: &str) -> Result<Option<i64>, SeqError> {
        (**self).get_int(key)
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), SeqError> {
        (**self).set_int(key, value)
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, SeqError> {
        (**self).incr_by(key, delta)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        (**self).sadd(key, member)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        (**self).sismember(key, member)
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, SeqError> {
        (**self).smembers(key)
    }

    fn scard(&self, key: &str) -> Result<u64, SeqError> {
        (**self).scard(key)
    }

    fn smembers_many(&self, keys: &[String]) -> Result<Vec<Vec<String>>, SeqError> {
        (**self).smembers_many(keys)
    }
}

/// Opens the store named by `url`: `memory://` for a process-local store,
/// anything else is handed to the Redis client.
pub fn open(url: &str) -> Result<Arc<dyn KvStore>, SeqError> {
    if url == MEMORY_URL {
        warn!("using in-memory key-value store; state will not survive a restart");
        return Ok(Arc::new(MemoryKv::new()));
    }
    Ok(Arc::new(RedisKv::open(url)?))
}

pub struct RedisKv {
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
}

impl RedisKv {
    pub fn open(url: &str) -> Result<Self, SeqError> {
        let client = redis::Client::open(url).map_err(|err| SeqError::Kv(err.to_string()))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    /// Runs `op` on the cached connection, dialing a new one if needed. A
    /// connection that failed at the transport level is dropped so the next
    /// call reconnects.
    fn with_conn<T, F>(&self, op: F) -> Result<T, SeqError>
    where
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| SeqError::Kv("redis connection lock poisoned".to_string()))?;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => {
                debug!("dialing redis");
                self.client
                    .get_connection()
                    .map_err(|err| SeqError::Kv(err.to_string()))?
            }
        };
        match op(&mut conn) {
            Ok(value) => {
                *guard = Some(conn);
                Ok(value)
            }
            Err(err) => {
                if !(err.is_io_error() || err.is_connection_dropped()) {
                    *guard = Some(conn);
                }
                Err(SeqError::Kv(err.to_string()))
            }
        }
    }
}

impl KvStore for RedisKv {
    fn get_int(&self, key: &str) -> Result<Option<i64>, SeqError> {
        self.with_conn(|conn| conn.get::<_, Option<i64>>(key))
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), SeqError> {
        self.with_conn(|conn| conn.set::<_, _, ()>(key, value))
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, SeqError> {
        self.with_conn(|conn| conn.incr::<_, _, i64>(key, delta))
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        self.with_conn(|conn| conn.sadd::<_, _, i64>(key, member))
            .map(|added| added > 0)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        self.with_conn(|conn| conn.sismember::<_, _, bool>(key, member))
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, SeqError> {
        self.with_conn(|conn| conn.smembers::<_, Vec<String>>(key))
    }

    fn scard(&self, key: &str) -> Result<u64, SeqError> {
        self.with_conn(|conn| conn.scard::<_, u64>(key))
    }

    fn smembers_many(&self, keys: &[String]) -> Result<Vec<Vec<String>>, SeqError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let mut pipe = redis::pipe();
            for key in keys {
                pipe.smembers(key);
            }
            pipe.query::<Vec<Vec<String>>>(conn)
        })
    }
}

#[derive(Debug, Clone)]
enum MemoryValue {
    Int(i64),
    Set(BTreeSet<String>),
}

/// Process-local store with the same semantics as the Redis commands above,
/// including `WRONGTYPE` failures when a key is used as both kinds.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, MemoryValue>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T, F>(&self, op: F) -> Result<T, SeqError>
    where
        F: FnOnce(&mut HashMap<String, MemoryValue>) -> Result<T, SeqError>,
    {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SeqError::Kv("memory store lock poisoned".to_string()))?;
        op(&mut entries)
    }
}

fn wrong_type(key: &str) -> SeqError {
    SeqError::Kv(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

impl KvStore for MemoryKv {
    fn get_int(&self, key: &str) -> Result<Option<i64>, SeqError> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(None),
            Some(MemoryValue::Int(value)) => Ok(Some(*value)),
            Some(MemoryValue::Set(_)) => Err(wrong_type(key)),
        })
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), SeqError> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), MemoryValue::Int(value));
            Ok(())
        })
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, SeqError> {
        self.with_entries(|entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert(MemoryValue::Int(0));
            match entry {
                MemoryValue::Int(value) => {
                    *value += delta;
                    Ok(*value)
                }
                MemoryValue::Set(_) => Err(wrong_type(key)),
            }
        })
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        self.with_entries(|entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| MemoryValue::Set(BTreeSet::new()));
            match entry {
                MemoryValue::Set(members) => Ok(members.insert(member.to_string())),
                MemoryValue::Int(_) => Err(wrong_type(key)),
            }
        })
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(false),
            Some(MemoryValue::Set(members)) => Ok(members.contains(member)),
            Some(MemoryValue::Int(_)) => Err(wrong_type(key)),
        })
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, SeqError> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(MemoryValue::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(MemoryValue::Int(_)) => Err(wrong_type(key)),
        })
    }

    fn scard(&self, key: &str) -> Result<u64, SeqError> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(0),
            Some(MemoryValue::Set(members)) => Ok(members.len() as u64),
            Some(MemoryValue::Int(_)) => Err(wrong_type(key)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_counter_starts_at_zero() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get_int("offset").unwrap(), None);
        assert_eq!(kv.incr_by("offset", 5).unwrap(), 5);
        assert_eq!(kv.incr_by("offset", 2).unwrap(), 7);
    }

    #[test]
    fn memory_set_add_is_idempotent() {
        let kv = MemoryKv::new();
        assert!(kv.sadd("s", "a").unwrap());
        assert!(!kv.sadd("s", "a").unwrap());
        assert_eq!(kv.scard("s").unwrap(), 1);
        assert!(kv.sismember("s", "a").unwrap());
        assert!(!kv.sismember("missing", "a").unwrap());
    }

    #[test]
    fn memory_rejects_mixed_types() {
        let kv = MemoryKv::new();
        kv.set_int("k", 1).unwrap();
        assert!(kv.sadd("k", "a").is_err());
        assert!(kv.smembers("k").is_err());
    }

    #[test]
    fn default_smembers_many_preserves_key_order() {
        let kv = MemoryKv::new();
        kv.sadd("b", "2").unwrap();
        kv.sadd("a", "1").unwrap();
        let keys = vec!["b".to_string(), "missing".to_string(), "a".to_string()];
        let sets = kv.smembers_many(&keys).unwrap();
        assert_eq!(sets, vec![vec!["2".to_string()], vec![], vec!["1".to_string()]]);
    }
}
