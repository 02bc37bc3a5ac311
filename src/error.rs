use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unrecognized source url: {0}")]
    UnrecognizedUrl(String),

    #[error("a download for this url is already in progress: {0}")]
    AlreadyDownloading(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external tool is missing: {tool}")]
    ExternalToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("external tool timed out after {0}s")]
    TimedOut(u64),

    #[error("invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error("manifest probe failed: {0}")]
    ProbeFailed(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("invalid config at {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("canceled")]
    Canceled,
}

pub type Result<T> = std::result::Result<T, EngineError>;
