use crate::cmd;
use crate::engine::{
    lenient_string, CancelToken, DownloadReport, ExtractionEngine, FetchRequest, Manifest,
    PlaylistManifest, RawComment, RawProgress,
};
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde_json::Value;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const EXTERNAL_CMD_POLL_INTERVAL_MS: u64 = 200;
const STDERR_TAIL_CHARS: usize = 2000;

const PROGRESS_MARKER: &str = "[tubeshelf-progress]";
const OUTPUT_MARKER: &str = "[tubeshelf-output]";
const PROGRESS_TEMPLATE: &str = r#"download:[tubeshelf-progress]{"item_id":%(info.id)j,"item_url":%(info.webpage_url)j,"progress":%(progress)j}"#;
const OUTPUT_TEMPLATE: &str =
    r#"after_move:[tubeshelf-output]{"item_id":%(id)j,"filepath":%(filepath)j}"#;

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
    "www.youtube-nocookie.com",
];

pub fn is_recognized_url(raw: &str) -> bool {
    let parsed = match url::Url::parse(raw.trim()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    let host = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return false,
    };
    YOUTUBE_HOSTS.contains(&host.as_str()) || host.ends_with(".youtube.com")
}

pub fn is_playlist_url(raw: &str) -> bool {
    let parsed = match url::Url::parse(raw.trim()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    parsed.path().trim_end_matches('/') == "/playlist"
        || parsed
            .query_pairs()
            .any(|(k, v)| k == "list" && !v.trim().is_empty())
}

pub struct YtDlpEngine {
    paths: AppPaths,
    probe_timeout_secs: u64,
}

impl YtDlpEngine {
    pub fn new(paths: AppPaths, probe_timeout_secs: u64) -> Self {
        Self {
            paths,
            probe_timeout_secs,
        }
    }

    fn candidates(&self) -> Vec<(String, Vec<String>)> {
        let mut candidates = Vec::new();
        let bundled = self.paths.yt_dlp_bin_path();
        if bundled.exists() {
            candidates.push((bundled.to_string_lossy().to_string(), Vec::new()));
        }
        candidates.push(("yt-dlp".to_string(), Vec::new()));
        for python in ["python", "python3"] {
            candidates.push((
                python.to_string(),
                vec!["-m".to_string(), "yt_dlp".to_string()],
            ));
        }
        candidates
    }

    fn run(
        &self,
        args: &[String],
        cancel: Option<&CancelToken>,
        timeout_secs: u64,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<StreamedOutput> {
        let mut failures: Vec<String> = Vec::new();

        for (program, prefix) in self.candidates() {
            let is_module = !prefix.is_empty();
            let mut cmd = cmd::tool_command(&program, prefix.iter().chain(args));
            match run_streaming(&mut cmd, cancel, timeout_secs, on_line) {
                Ok(output) => {
                    if is_module && module_missing(&output.stderr) {
                        continue;
                    }
                    return Ok(output);
                }
                Err(CommandRunError::Spawn(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    continue;
                }
                Err(CommandRunError::Spawn(e)) => {
                    failures.push(format!("{program} could not start: {e}"));
                    continue;
                }
                Err(CommandRunError::Wait(e)) => return Err(EngineError::Io(e)),
                Err(CommandRunError::Canceled) => return Err(EngineError::Canceled),
                Err(CommandRunError::TimedOut(limit)) => return Err(EngineError::TimedOut(limit)),
            }
        }

        if !failures.is_empty() {
            return Err(EngineError::ExternalToolFailed {
                tool: "yt-dlp".to_string(),
                code: None,
                stderr: failures.join(" | "),
            });
        }
        Err(EngineError::ExternalToolMissing {
            tool: "yt-dlp".to_string(),
        })
    }

    fn run_json(&self, args: &[String]) -> Result<Value> {
        let mut stdout = String::new();
        let output = self.run(args, None, self.probe_timeout_secs, &mut |line| {
            stdout.push_str(line);
            stdout.push('\n');
        })?;
        if !output.status.success() {
            return Err(EngineError::ProbeFailed(tool_failure(&output)));
        }
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Err(EngineError::ProbeFailed(
                "yt-dlp printed no manifest".to_string(),
            ));
        }
        Ok(serde_json::from_str(trimmed)?)
    }
}

impl ExtractionEngine for YtDlpEngine {
    fn download(
        &self,
        request: &FetchRequest<'_>,
        cancel: &CancelToken,
        on_progress: &mut dyn FnMut(RawProgress),
    ) -> Result<DownloadReport> {
        std::fs::create_dir_all(&request.options.working_dir)?;

        let args = download_args(request);
        let mut report = DownloadReport::default();
        let working_dir = request.options.working_dir.clone();

        let output = self.run(
            &args,
            Some(cancel),
            request.options.timeout_secs,
            &mut |line| match parse_line(line) {
                Some(EngineLine::Progress(raw)) => on_progress(raw),
                Some(EngineLine::Output { item_id, path }) => {
                    let path = if path.is_relative() {
                        working_dir.join(path)
                    } else {
                        path
                    };
                    report.outputs.insert(item_id, path);
                }
                None => {}
            },
        )?;

        if output.status.success() {
            return Ok(report);
        }
        // With --ignore-errors a playlist run exits non-zero when some entries fail.
        if request.options.ignore_errors && !report.outputs.is_empty() {
            return Ok(report);
        }
        Err(EngineError::ExternalToolFailed {
            tool: "yt-dlp".to_string(),
            code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        })
    }

    fn probe(&self, request: &FetchRequest<'_>) -> Result<Manifest> {
        let value = self.run_json(&probe_args(request))?;
        Manifest::from_value(&value)
    }

    fn probe_playlist(&self, request: &FetchRequest<'_>) -> Result<PlaylistManifest> {
        let value = self.run_json(&playlist_args(request))?;
        PlaylistManifest::from_value(&value)
    }

    fn fetch_comments(&self, request: &FetchRequest<'_>) -> Result<Vec<RawComment>> {
        let value = self.run_json(&comment_args(request))?;
        Ok(Manifest::from_value(&value)?.comments.unwrap_or_default())
    }
}

fn push_network_args(args: &mut Vec<String>, request: &FetchRequest<'_>) {
    let o = request.options;
    args.extend([
        "--retries".to_string(),
        o.retries.to_string(),
        "--socket-timeout".to_string(),
        o.socket_timeout_secs.to_string(),
    ]);
}

fn push_output_args(args: &mut Vec<String>, request: &FetchRequest<'_>) {
    let o = request.options;
    if !request.format.trim().is_empty() {
        args.push("-f".to_string());
        args.push(request.format.to_string());
    }
    if let Some(merge) = o.merge_output_format.as_deref().filter(|m| !m.trim().is_empty()) {
        args.push("--merge-output-format".to_string());
        args.push(merge.to_string());
    }
    args.push("-P".to_string());
    args.push(o.working_dir.to_string_lossy().to_string());
    args.push("-o".to_string());
    args.push(o.output_template.clone());
}

fn download_args(request: &FetchRequest<'_>) -> Vec<String> {
    let o = request.options;
    let mut args = vec![
        "--newline".to_string(),
        "--no-warnings".to_string(),
        "--progress".to_string(),
        "--progress-template".to_string(),
        PROGRESS_TEMPLATE.to_string(),
        "--print".to_string(),
        OUTPUT_TEMPLATE.to_string(),
        "--no-simulate".to_string(),
    ];
    push_network_args(&mut args, request);
    args.extend([
        "--fragment-retries".to_string(),
        o.fragment_retries.to_string(),
        "--concurrent-fragments".to_string(),
        o.concurrent_fragments.max(1).to_string(),
        "--file-access-retries".to_string(),
        "5".to_string(),
        "--skip-unavailable-fragments".to_string(),
    ]);
    args.push(if o.resume { "--continue" } else { "--no-continue" }.to_string());
    if o.keep_partial_files {
        args.push("--keep-fragments".to_string());
    }
    if o.write_info_json {
        args.push("--write-info-json".to_string());
    }
    if o.ignore_errors {
        args.push("--ignore-errors".to_string());
    }
    if o.skip_download {
        args.push("--skip-download".to_string());
    }
    args.push(if o.allow_playlist { "--yes-playlist" } else { "--no-playlist" }.to_string());
    push_output_args(&mut args, request);
    args.push(request.url.to_string());
    args
}

fn probe_args(request: &FetchRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "-J".to_string(),
        "--no-warnings".to_string(),
        "--skip-download".to_string(),
        "--no-playlist".to_string(),
    ];
    push_network_args(&mut args, request);
    if request.options.fetch_comments {
        push_comment_args(&mut args, request);
    }
    push_output_args(&mut args, request);
    args.push(request.url.to_string());
    args
}

fn playlist_args(request: &FetchRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "-J".to_string(),
        "--no-warnings".to_string(),
        "--flat-playlist".to_string(),
        "--yes-playlist".to_string(),
    ];
    push_network_args(&mut args, request);
    args.push(request.url.to_string());
    args
}

fn comment_args(request: &FetchRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "-J".to_string(),
        "--no-warnings".to_string(),
        "--skip-download".to_string(),
        "--no-playlist".to_string(),
    ];
    push_network_args(&mut args, request);
    push_comment_args(&mut args, request);
    args.push(request.url.to_string());
    args
}

fn push_comment_args(args: &mut Vec<String>, request: &FetchRequest<'_>) {
    args.push("--write-comments".to_string());
    if let Some(max) = request.options.max_comments {
        args.push("--extractor-args".to_string());
        args.push(format!("youtube:max_comments={max}"));
    }
}

#[derive(Debug, PartialEq)]
enum EngineLine {
    Progress(RawProgress),
    Output { item_id: String, path: PathBuf },
}

fn parse_line(line: &str) -> Option<EngineLine> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
        let value: Value = serde_json::from_str(rest).ok()?;
        let mut raw = RawProgress::from_value(value.get("progress")?)?;
        raw.item_id = value.get("item_id").and_then(lenient_string);
        raw.item_url = value.get("item_url").and_then(lenient_string);
        return Some(EngineLine::Progress(raw));
    }
    if let Some(rest) = line.strip_prefix(OUTPUT_MARKER) {
        let value: Value = serde_json::from_str(rest).ok()?;
        let item_id = value
            .get("item_id")
            .and_then(lenient_string)
            .filter(|s| !s.trim().is_empty())?;
        let path = value
            .get("filepath")
            .and_then(lenient_string)
            .filter(|s| !s.trim().is_empty())?;
        return Some(EngineLine::Output {
            item_id,
            path: PathBuf::from(path),
        });
    }
    None
}

fn module_missing(stderr: &[u8]) -> bool {
    String::from_utf8_lossy(stderr).contains("No module named")
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "unknown error".to_string();
    }
    let skip = text.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    text.chars().skip(skip).collect()
}

fn tool_failure(output: &StreamedOutput) -> String {
    format!(
        "yt-dlp failed (code={:?}): {}",
        output.status.code(),
        stderr_tail(&output.stderr)
    )
}

#[derive(Debug)]
enum CommandRunError {
    Spawn(std::io::Error),
    Wait(std::io::Error),
    Canceled,
    TimedOut(u64),
}

struct StreamedOutput {
    status: ExitStatus,
    stderr: Vec<u8>,
}

/// Spawns `cmd`, hands each stdout line to `on_line` as it arrives and polls the
/// cancel token and deadline between lines.
fn run_streaming(
    cmd: &mut Command,
    cancel: Option<&CancelToken>,
    timeout_secs: u64,
    on_line: &mut dyn FnMut(&str),
) -> std::result::Result<StreamedOutput, CommandRunError> {
    use std::io::ErrorKind;

    let mut child = cmd.spawn().map_err(CommandRunError::Spawn)?;

    let stdout = child.stdout.take().ok_or_else(|| {
        CommandRunError::Wait(std::io::Error::new(ErrorKind::Other, "stdout pipe missing"))
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        CommandRunError::Wait(std::io::Error::new(ErrorKind::Other, "stderr pipe missing"))
    })?;

    let (line_tx, line_rx) = mpsc::channel::<String>();
    let stdout_handle = thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let started = Instant::now();
    let mut abort_reason: Option<CommandRunError> = None;

    loop {
        let stdout_closed =
            match line_rx.recv_timeout(Duration::from_millis(EXTERNAL_CMD_POLL_INTERVAL_MS)) {
                Ok(line) => {
                    on_line(&line);
                    false
                }
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => true,
            };

        if cancel.map(CancelToken::is_cancelled).unwrap_or(false) {
            cmd::kill_tree(&mut child);
            abort_reason = Some(CommandRunError::Canceled);
        } else if timeout_secs > 0 && started.elapsed() >= Duration::from_secs(timeout_secs) {
            cmd::kill_tree(&mut child);
            abort_reason = Some(CommandRunError::TimedOut(timeout_secs));
        }

        if abort_reason.is_some() || stdout_closed {
            break;
        }
    }

    if let Some(reason) = abort_reason {
        // Helpers spawned by the tool may still hold the pipes; do not join the readers.
        return Err(reason);
    }

    let status = match child.wait() {
        Ok(status) => status,
        Err(err) => {
            cmd::kill_tree(&mut child);
            return Err(CommandRunError::Wait(err));
        }
    };
    let _ = stdout_handle.join();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(StreamedOutput { status, stderr })
}
