use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CorpusSettings, SearchSettings};
use crate::error::SeqError;
use crate::scheduler::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One ranked hit. `hash` is the first token of the hit definition line, which
/// is the content hash the sequence file was written under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub hash: String,
    pub bit_score: f64,
    pub score: i64,
    pub evalue: String,
    pub query_seq: String,
    pub midline: String,
    pub hit_seq: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchOutput {
    pub version: String,
    pub db_sequences: Option<u64>,
    pub hits: Vec<SearchHit>,
}

pub trait SearchTool: Send + Sync {
    fn search(&self, query: &str) -> Result<SearchOutput, SeqError>;
}

impl<T: SearchTool + ?Sized> SearchTool for std::sync::Arc<T> {
    fn search(&self, query: &str) -> Result<SearchOutput, SeqError> {
        (**self).search(query)
    }
}

/// Runs `blastn -db <name> -outfmt 5` against the prebuilt corpus.
#[derive(Debug, Clone)]
pub struct BlastSearchTool {
    program: String,
    db_dir: Utf8PathBuf,
    db_name: String,
    timeout: Duration,
    token: Option<CancellationToken>,
}

impl BlastSearchTool {
    pub fn new(search: &SearchSettings, corpus: &CorpusSettings) -> Self {
        Self {
            program: search.program.clone(),
            db_dir: corpus.dir.clone(),
            db_name: corpus.name.clone(),
            timeout: search.timeout,
            token: None,
        }
    }

    /// Kills the running search when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    fn wait_with_deadline(&self, child: &mut Child, deadline: Instant) -> Result<ExitStatus, SeqError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(err) => return Err(SeqError::SearchToolFailure(err.to_string())),
            }

            let cancelled = self.token.as_ref().is_some_and(|token| token.is_cancelled());
            if cancelled || Instant::now() >= deadline {
                kill_process_group(child);
                if cancelled {
                    return Err(SeqError::SearchToolFailure("search cancelled".to_string()));
                }
                warn!(timeout_ms = self.timeout.as_millis() as u64, "search tool timed out, killed");
                return Err(SeqError::SearchTimeout(self.timeout));
            }

            let pause = POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()));
            match &self.token {
                Some(token) => {
                    token.wait_timeout(pause);
                }
                None => thread::sleep(pause),
            }
        }
    }
}

impl SearchTool for BlastSearchTool {
    fn search(&self, query: &str) -> Result<SearchOutput, SeqError> {
        let program = resolve_program(&self.program)
            .ok_or_else(|| SeqError::MissingTool(self.program.clone()))?;
        let started = Instant::now();
        let deadline = started.checked_add(self.timeout).ok_or_else(|| {
            SeqError::SearchToolFailure(format!("search timeout {:?} is out of range", self.timeout))
        })?;
        info!(db = %self.db_name, blastdb = %self.db_dir, "running search tool");

        let mut command = Command::new(&program);
        command
            .args(["-db", self.db_name.as_str(), "-outfmt", "5"])
            .env("BLASTDB", self.db_dir.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: a wrapper script and its children are killed together.
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(|err| {
            SeqError::SearchToolFailure(format!("{}: {err}", program.display()))
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, written, out, err) = thread::scope(|scope| {
            let writer = scope.spawn(move || write_query(stdin, query));
            let out_reader = scope.spawn(move || read_all(stdout));
            let err_reader = scope.spawn(move || read_all(stderr));

            let status = self.wait_with_deadline(&mut child, deadline);
            let written = writer.join().unwrap_or_else(|_| {
                Err(io::Error::new(io::ErrorKind::Other, "stdin writer panicked"))
            });
            let out = out_reader.join().unwrap_or_default();
            let err = err_reader.join().unwrap_or_default();
            (status, written, out, err)
        });

        let status = status?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&err).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {status}", program.display())
            } else {
                stderr
            };
            return Err(SeqError::SearchToolFailure(message));
        }
        if let Err(err) = written {
            if err.kind() != io::ErrorKind::BrokenPipe {
                return Err(SeqError::SearchToolFailure(format!(
                    "writing query to search tool: {err}"
                )));
            }
        }

        let output = parse_blast_xml(&String::from_utf8_lossy(&out))?;
        debug!(
            hits = output.hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search tool finished"
        );
        Ok(output)
    }
}

/// Kills the tool and everything it spawned. The pipes only close once every
/// process holding them is gone.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Writes the query then drops the pipe so the tool sees end of input.
fn write_query(stdin: Option<std::process::ChildStdin>, query: &str) -> io::Result<()> {
    let mut stdin = stdin.ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdin not piped"))?;
    stdin.write_all(query.as_bytes())?;
    stdin.write_all(b"\n")?;
    stdin.flush()
}

fn read_all<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

/// A bare program name is looked up on `PATH` and then in the working
/// directory; anything containing a separator is used as given.
pub fn resolve_program(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.exists().then(|| candidate.to_path_buf());
    }
    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let plain = dir.join(name);
            if plain.is_file() {
                return Some(plain);
            }
        }
    }
    let local = std::env::current_dir().ok()?.join(name);
    local.is_file().then_some(local)
}

#[derive(Default)]
struct HitBuilder {
    hash: String,
    hsp_count: usize,
    bit_score: Option<f64>,
    score: Option<i64>,
    evalue: String,
    query_seq: String,
    midline: String,
    hit_seq: String,
}

impl HitBuilder {
    fn finish(self) -> Result<SearchHit, SeqError> {
        let missing = |field: &str| {
            SeqError::SearchToolFailure(format!("hit {} has no {field}", self.hash))
        };
        Ok(SearchHit {
            bit_score: self.bit_score.ok_or_else(|| missing("bit score"))?,
            score: self.score.ok_or_else(|| missing("score"))?,
            hash: self.hash,
            evalue: self.evalue,
            query_seq: self.query_seq,
            midline: self.midline,
            hit_seq: self.hit_seq,
        })
    }
}

/// Decodes BLAST XML (`-outfmt 5`). Only the first HSP of each hit is kept.
pub fn parse_blast_xml(xml: &str) -> Result<SearchOutput, SeqError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut output = SearchOutput::default();
    let mut saw_root = false;
    let mut element: Vec<u8> = Vec::new();
    let mut hit: Option<HitBuilder> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                match name.as_slice() {
                    b"BlastOutput" => saw_root = true,
                    b"Hit" => hit = Some(HitBuilder::default()),
                    b"Hsp" => {
                        if let Some(hit) = hit.as_mut() {
                            hit.hsp_count += 1;
                        }
                    }
                    _ => {}
                }
                element = name;
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|err| {
                    SeqError::SearchToolFailure(format!("invalid BLAST XML text: {err}"))
                })?;
                let text = text.trim();
                match element.as_slice() {
                    b"BlastOutput_version" => output.version = text.to_string(),
                    b"Statistics_db-num" if output.db_sequences.is_none() => {
                        output.db_sequences = Some(parse_number(text, "Statistics_db-num")?);
                    }
                    _ => {}
                }
                if let Some(hit) = hit.as_mut() {
                    apply_hit_field(hit, &element, text)?;
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"Hit" {
                    if let Some(done) = hit.take() {
                        output.hits.push(done.finish()?);
                    }
                }
                element.clear();
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(SeqError::SearchToolFailure(format!(
                    "invalid BLAST XML at byte {}: {err}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(SeqError::SearchToolFailure(
            "search tool output is not BLAST XML".to_string(),
        ));
    }
    Ok(output)
}

fn apply_hit_field(hit: &mut HitBuilder, element: &[u8], text: &str) -> Result<(), SeqError> {
    if element == b"Hit_def" {
        hit.hash = text.split_whitespace().next().unwrap_or_default().to_string();
        return Ok(());
    }
    if hit.hsp_count != 1 {
        return Ok(());
    }
    match element {
        b"Hsp_bit-score" => hit.bit_score = Some(parse_number(text, "Hsp_bit-score")?),
        b"Hsp_score" => hit.score = Some(parse_number(text, "Hsp_score")?),
        b"Hsp_evalue" => hit.evalue = text.to_string(),
        b"Hsp_qseq" => hit.query_seq = text.to_string(),
        b"Hsp_midline" => hit.midline = text.to_string(),
        b"Hsp_hseq" => hit.hit_seq = text.to_string(),
        _ => {}
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(text: &str, field: &str) -> Result<T, SeqError> {
    text.parse()
        .map_err(|_| SeqError::SearchToolFailure(format!("invalid {field} value {text:?}")))
}
