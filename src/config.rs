use crate::engine::FetchOptions;
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retries: u32,
    pub fragment_retries: u32,
    pub concurrent_fragments: u32,
    pub socket_timeout_secs: u64,
    /// Continue partially downloaded files instead of restarting them.
    pub resume: bool,
    /// Keep fragments on disk after a download so a later run can resume from them.
    pub keep_partial_files: bool,
    pub write_info_json: bool,
    pub ignore_errors: bool,
    pub merge_output_format: Option<String>,
    pub output_template: String,
    pub playlist_output_template: String,
    pub allow_playlists: bool,
    pub fetch_comments: bool,
    pub max_comments: Option<u32>,
    pub thumbnail_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub event_buffer: usize,
    pub catalog_poll_ms: u64,
    pub progress_poll_ms: u64,
    /// Canonical tier label (e.g. "720p") to format expression.
    pub format_overrides: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            fragment_retries: 10,
            concurrent_fragments: 5,
            socket_timeout_secs: 30,
            resume: true,
            keep_partial_files: true,
            write_info_json: true,
            ignore_errors: true,
            merge_output_format: Some("mp4".to_string()),
            output_template: "videos/%(title)s.%(ext)s".to_string(),
            playlist_output_template:
                "playlists/%(playlist_title)s/%(playlist_index)03d - %(title)s.%(ext)s".to_string(),
            allow_playlists: true,
            fetch_comments: true,
            max_comments: None,
            thumbnail_timeout_secs: 10,
            probe_timeout_secs: 900,
            download_timeout_secs: 7200,
            event_buffer: 64,
            catalog_poll_ms: 1000,
            progress_poll_ms: 500,
            format_overrides: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn fetch_options(&self, paths: &AppPaths) -> FetchOptions {
        FetchOptions {
            skip_download: false,
            fetch_comments: false,
            output_template: self.output_template.clone(),
            working_dir: paths.working_dir(),
            retries: self.retries,
            fragment_retries: self.fragment_retries,
            concurrent_fragments: self.concurrent_fragments.max(1),
            socket_timeout_secs: self.socket_timeout_secs,
            resume: self.resume,
            keep_partial_files: self.keep_partial_files,
            write_info_json: self.write_info_json,
            ignore_errors: self.ignore_errors,
            merge_output_format: self.merge_output_format.clone(),
            allow_playlist: false,
            max_comments: self.max_comments,
            timeout_secs: self.download_timeout_secs,
        }
    }

    pub fn playlist_fetch_options(&self, paths: &AppPaths) -> FetchOptions {
        FetchOptions {
            output_template: self.playlist_output_template.clone(),
            allow_playlist: true,
            ..self.fetch_options(paths)
        }
    }
}

pub fn load_engine_config(paths: &AppPaths) -> Result<EngineConfig> {
    let path = paths.engine_config_path();
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let bytes = std::fs::read(&path)?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::Config {
        path: path.clone(),
        message: e.to_string(),
    })
}

pub fn save_engine_config(paths: &AppPaths, config: &EngineConfig) -> Result<()> {
    let path = paths.engine_config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}
