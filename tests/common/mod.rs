#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use seqdedup::domain::PageRequest;
use seqdedup::error::SeqError;
use seqdedup::kv::{KvStore, MemoryKv};
use seqdedup::scheduler::{Scheduler, SleepOutcome};
use seqdedup::sparql::UpstreamSource;

/// Renders rows of `(uri, elements, created)` as a SPARQL XML result document.
pub fn sparql_page(rows: &[(&str, &str, &str)]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0"?>
<sparql xmlns="http://www.w3.org/2005/sparql-results#">
<head><variable name="uri"/><variable name="elements"/><variable name="created"/></head>
<results distinct="false" ordered="true">
"#,
    );
    for (uri, elements, created) in rows {
        xml.push_str(&format!(
            "<result><binding name=\"uri\"><uri>{uri}</uri></binding>\
             <binding name=\"elements\"><literal>{elements}</literal></binding>\
             <binding name=\"created\"><literal>{created}</literal></binding></result>\n"
        ));
    }
    xml.push_str("</results>\n</sparql>\n");
    xml
}

/// Upstream double serving `LIMIT/OFFSET` slices of a fixed, ordered record list.
pub struct FakeUpstream {
    rows: Mutex<Vec<(String, String, String)>>,
    requests: Mutex<Vec<PageRequest>>,
    fail: AtomicBool,
}

impl FakeUpstream {
    pub fn new(rows: &[(&str, &str, &str)]) -> Self {
        Self {
            rows: Mutex::new(
                rows.iter()
                    .map(|(u, e, c)| (u.to_string(), e.to_string(), c.to_string()))
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn append(&self, row: (&str, &str, &str)) {
        self.rows
            .lock()
            .unwrap()
            .push((row.0.to_string(), row.1.to_string(), row.2.to_string()));
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl UpstreamSource for FakeUpstream {
    fn fetch_page(&self, request: PageRequest) -> Result<String, SeqError> {
        self.requests.lock().unwrap().push(request);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SeqError::UpstreamUnavailable("connection refused".to_string()));
        }
        let rows = self.rows.lock().unwrap();
        let page = rows
            .iter()
            .skip(request.offset as usize)
            .take(request.limit)
            .map(|(u, e, c)| (u.as_str(), e.as_str(), c.as_str()))
            .collect::<Vec<_>>();
        Ok(sparql_page(&page))
    }
}

impl UpstreamSource for &FakeUpstream {
    fn fetch_page(&self, request: PageRequest) -> Result<String, SeqError> {
        (**self).fetch_page(request)
    }
}

/// Upstream double returning one canned body.
pub struct CannedUpstream(pub String);

impl UpstreamSource for CannedUpstream {
    fn fetch_page(&self, _request: PageRequest) -> Result<String, SeqError> {
        Ok(self.0.clone())
    }
}

/// In-memory store whose writes, counter increments or every command can be
/// switched to fail, standing in for a crash or an unreachable server.
#[derive(Default)]
pub struct FlakyKv {
    pub inner: MemoryKv,
    pub fail_incr: AtomicBool,
    pub fail_sadd: AtomicBool,
    pub down: AtomicBool,
    pub sadd_calls: AtomicUsize,
}

impl FlakyKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<(), SeqError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SeqError::Kv("Connection refused (os error 111)".to_string()));
        }
        Ok(())
    }
}

impl KvStore for FlakyKv {
    fn get_int(&self, key: &str) -> Result<Option<i64>, SeqError> {
        self.check()?;
        self.inner.get_int(key)
    }

    fn set_int(&self, key: &str, value: i64) -> Result<(), SeqError> {
        self.check()?;
        self.inner.set_int(key, value)
    }

    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, SeqError> {
        self.check()?;
        if self.fail_incr.load(Ordering::SeqCst) {
            return Err(SeqError::Kv("simulated crash before INCRBY".to_string()));
        }
        self.inner.incr_by(key, delta)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        self.check()?;
        self.sadd_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sadd.load(Ordering::SeqCst) {
            return Err(SeqError::Kv("simulated SADD failure".to_string()));
        }
        self.inner.sadd(key, member)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool, SeqError> {
        self.check()?;
        self.inner.sismember(key, member)
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>, SeqError> {
        self.check()?;
        self.inner.smembers(key)
    }

    fn scard(&self, key: &str) -> Result<u64, SeqError> {
        self.check()?;
        self.inner.scard(key)
    }
}

/// Records requested sleeps instead of waiting, and reports cancellation once
/// `max_sleeps` have been requested.
pub struct RecordingScheduler {
    sleeps: Mutex<Vec<Duration>>,
    max_sleeps: usize,
}

impl RecordingScheduler {
    pub fn new(max_sleeps: usize) -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            max_sleeps,
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn sleep(&self, duration: Duration) -> SleepOutcome {
        let mut sleeps = self.sleeps.lock().unwrap();
        sleeps.push(duration);
        if sleeps.len() >= self.max_sleeps {
            SleepOutcome::Cancelled
        } else {
            SleepOutcome::Elapsed
        }
    }

    fn is_cancelled(&self) -> bool {
        self.sleeps.lock().unwrap().len() >= self.max_sleeps
    }
}

/// Held while writing and running helper scripts, so no other test forks
/// while a script file is still open for writing.
pub static EXEC_LOCK: Mutex<()> = Mutex::new(());

#[cfg(unix)]
pub fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
