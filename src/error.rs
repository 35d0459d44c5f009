use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SeqError {
    #[error("upstream source unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream source returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("cursor advance failed: {0}")]
    CursorAdvanceFailed(String),

    #[error("search tool failed: {0}")]
    SearchToolFailure(String),

    #[error("search tool timed out after {0:?}")]
    SearchTimeout(Duration),

    #[error("query sequence is empty")]
    EmptyQuery,

    #[error("reconciliation lookup failed: {0}")]
    ReconciliationLookupFailed(String),

    #[error("key-value store error: {0}")]
    Kv(String),

    #[error("invalid content hash: {0}")]
    InvalidContentHash(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("corpus build failed: {0}")]
    CorpusBuild(String),
}
