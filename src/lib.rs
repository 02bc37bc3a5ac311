pub mod cmd;
pub mod committer;
pub mod config;
pub mod db;
pub mod engine;
mod error;
pub mod format;
pub mod library;
pub mod paths;
pub mod progress;
pub mod supervisor;
pub mod tasklog;
pub mod ytdlp;

pub use error::{EngineError, Result};
