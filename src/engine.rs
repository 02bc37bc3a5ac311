use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    pub skip_download: bool,
    pub fetch_comments: bool,
    pub output_template: String,
    pub working_dir: PathBuf,
    pub retries: u32,
    pub fragment_retries: u32,
    pub concurrent_fragments: u32,
    pub socket_timeout_secs: u64,
    pub resume: bool,
    pub keep_partial_files: bool,
    pub write_info_json: bool,
    pub ignore_errors: bool,
    pub merge_output_format: Option<String>,
    pub allow_playlist: bool,
    pub max_comments: Option<u32>,
    /// Wall-clock limit for one engine invocation; 0 disables it.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub format: &'a str,
    pub options: &'a FetchOptions,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProgress {
    pub status: Option<String>,
    pub downloaded_bytes: Option<f64>,
    pub total_bytes: Option<f64>,
    pub total_bytes_estimate: Option<f64>,
    pub filename: Option<String>,
    pub item_id: Option<String>,
    pub item_url: Option<String>,
}

impl RawProgress {
    pub fn downloading(downloaded: f64, total: Option<f64>) -> Self {
        Self {
            status: Some("downloading".to_string()),
            downloaded_bytes: Some(downloaded),
            total_bytes: total,
            ..Self::default()
        }
    }

    pub fn finished(filename: &str) -> Self {
        Self {
            status: Some("finished".to_string()),
            filename: Some(filename.to_string()),
            ..Self::default()
        }
    }

    /// Builds a callback from an engine progress dictionary. Returns `None` when the
    /// payload is not an object; unknown or mistyped fields are dropped.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            status: obj.get("status").and_then(lenient_string),
            downloaded_bytes: obj.get("downloaded_bytes").and_then(lenient_number),
            total_bytes: obj.get("total_bytes").and_then(lenient_number),
            total_bytes_estimate: obj.get("total_bytes_estimate").and_then(lenient_number),
            filename: obj.get("filename").and_then(lenient_string),
            item_id: None,
            item_url: None,
        })
    }

    pub fn item_key(&self) -> Option<&str> {
        self.item_id
            .as_deref()
            .or(self.filename.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawComment {
    pub id: String,
    pub author: String,
    pub text: String,
    pub like_count: i64,
}

impl RawComment {
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            id: obj.get("id").and_then(lenient_string).unwrap_or_default(),
            author: obj
                .get("author")
                .and_then(lenient_string)
                .unwrap_or_else(|| "Unknown".to_string()),
            text: obj.get("text").and_then(lenient_string).unwrap_or_default(),
            like_count: obj
                .get("like_count")
                .and_then(lenient_number)
                .map(|n| n as i64)
                .unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
    pub webpage_url: Option<String>,
    pub filename: Option<String>,
    /// `None` when the engine was not asked for comments.
    pub comments: Option<Vec<RawComment>>,
}

impl Manifest {
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| EngineError::ManifestInvalid("manifest is not an object".to_string()))?;

        let id = obj
            .get("id")
            .and_then(lenient_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::ManifestInvalid("manifest has no id".to_string()))?;

        let filename = obj
            .get("filepath")
            .or_else(|| obj.get("_filename"))
            .or_else(|| obj.get("filename"))
            .and_then(lenient_string)
            .or_else(|| {
                obj.get("requested_downloads")
                    .and_then(Value::as_array)
                    .and_then(|d| d.first())
                    .and_then(|d| d.get("filepath").or_else(|| d.get("filename")))
                    .and_then(lenient_string)
            });

        let comments = obj
            .get("comments")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(RawComment::from_value).collect());

        Ok(Self {
            id,
            title: obj.get("title").and_then(lenient_string).unwrap_or_default(),
            description: obj
                .get("description")
                .and_then(lenient_string)
                .unwrap_or_default(),
            thumbnail: thumbnail_url(obj),
            webpage_url: obj.get("webpage_url").and_then(lenient_string),
            filename,
            comments,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistManifest {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
    pub entry_count: usize,
}

impl PlaylistManifest {
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| EngineError::ManifestInvalid("playlist is not an object".to_string()))?;
        let id = obj
            .get("id")
            .and_then(lenient_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EngineError::ManifestInvalid("playlist has no id".to_string()))?;

        Ok(Self {
            id,
            title: obj.get("title").and_then(lenient_string).unwrap_or_default(),
            description: obj
                .get("description")
                .and_then(lenient_string)
                .unwrap_or_default(),
            thumbnail: thumbnail_url(obj),
            entry_count: obj
                .get("entries")
                .and_then(Value::as_array)
                .map(|e| e.len())
                .unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadReport {
    pub outputs: BTreeMap<String, PathBuf>,
}

impl DownloadReport {
    pub fn output_for(&self, item_id: &str) -> Option<&Path> {
        self.outputs.get(item_id).map(PathBuf::as_path)
    }
}

pub trait ExtractionEngine: Send + Sync {
    /// Blocking download. `on_progress` is invoked for every raw callback; the engine
    /// checks `cancel` between callbacks and returns `EngineError::Canceled` once it stops.
    fn download(
        &self,
        request: &FetchRequest<'_>,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(RawProgress),
    ) -> Result<DownloadReport>;

    fn probe(&self, request: &FetchRequest<'_>) -> Result<Manifest>;

    fn probe_playlist(&self, request: &FetchRequest<'_>) -> Result<PlaylistManifest>;

    fn fetch_comments(&self, request: &FetchRequest<'_>) -> Result<Vec<RawComment>>;
}

fn thumbnail_url(obj: &serde_json::Map<String, Value>) -> Option<String> {
    obj.get("thumbnail")
        .and_then(lenient_string)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            obj.get("thumbnails")
                .and_then(Value::as_array)
                .and_then(|list| {
                    list.iter()
                        .rev()
                        .find_map(|t| t.get("url").and_then(lenient_string))
                })
        })
}

pub(crate) fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn lenient_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}
