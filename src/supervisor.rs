use crate::committer::{
    CommentSource, CommitWarning, EngineComments, HttpThumbnails, MetadataCommitter,
};
use crate::config::{load_engine_config, EngineConfig};
use crate::db::ensure_schema;
use crate::engine::{
    CancelToken, DownloadReport, ExtractionEngine, FetchOptions, FetchRequest, Manifest,
    PlaylistManifest, RawProgress,
};
use crate::format::{FormatPolicy, QualityTier};
use crate::library::Video;
use crate::paths::AppPaths;
use crate::progress::{FinishedItem, ProgressEvent, ProgressTranslator};
use crate::tasklog::TaskLog;
use crate::ytdlp::{is_playlist_url, is_recognized_url, YtDlpEngine};
use crate::{EngineError, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CALLBACK_POLL_INTERVAL_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            Self::Idle => matches!(next, Self::Running | Self::Failed | Self::Cancelled),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Succeeded,
            3 => Self::Failed,
            4 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Succeeded => 2,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Progress(u8),
    ItemFinished {
        external_id: String,
        local_path: PathBuf,
    },
    Warning(CommitWarning),
    Succeeded {
        videos: Vec<Video>,
    },
    Failed {
        reason: String,
    },
    Cancelled,
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

/// Receiving side of a task's events.
///
/// At most `event_buffer` progress events are queued; further ones are dropped until
/// the caller reads. Every other event is always queued.
pub struct TaskEvents {
    rx: Receiver<TaskEvent>,
    queued_progress: Arc<AtomicUsize>,
}

impl TaskEvents {
    pub fn recv(&self) -> std::result::Result<TaskEvent, RecvError> {
        self.rx.recv().map(|e| self.taken(e))
    }

    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<TaskEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout).map(|e| self.taken(e))
    }

    pub fn try_recv(&self) -> std::result::Result<TaskEvent, TryRecvError> {
        self.rx.try_recv().map(|e| self.taken(e))
    }

    pub fn iter(&self) -> impl Iterator<Item = TaskEvent> + '_ {
        std::iter::from_fn(move || self.recv().ok())
    }

    fn taken(&self, event: TaskEvent) -> TaskEvent {
        if matches!(event, TaskEvent::Progress(_)) {
            self.queued_progress.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }
}

struct EventSender {
    tx: Sender<TaskEvent>,
    queued_progress: Arc<AtomicUsize>,
    progress_capacity: usize,
}

fn event_channel(progress_capacity: usize) -> (EventSender, TaskEvents) {
    let (tx, rx) = mpsc::channel();
    let queued_progress = Arc::new(AtomicUsize::new(0));
    (
        EventSender {
            tx,
            queued_progress: queued_progress.clone(),
            progress_capacity: progress_capacity.max(1),
        },
        TaskEvents {
            rx,
            queued_progress,
        },
    )
}

impl EventSender {
    fn progress(&self, pct: u8) -> bool {
        if self.queued_progress.fetch_add(1, Ordering::SeqCst) >= self.progress_capacity {
            self.queued_progress.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        if self.tx.send(TaskEvent::Progress(pct)).is_err() {
            self.queued_progress.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn send(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Default)]
struct TaskShared {
    status: AtomicU8,
    percent: AtomicU8,
    error: Mutex<Option<String>>,
    cancel: CancelToken,
}

impl TaskShared {
    fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn transition(&self, next: TaskStatus) -> bool {
        let mut current = self.status.load(Ordering::SeqCst);
        loop {
            if !TaskStatus::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.status.compare_exchange(
                current,
                next.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_error(&self, reason: &str) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }

    fn summary(&self, id: u64, url: &str, format: &str) -> TaskSummary {
        TaskSummary {
            id,
            url: url.to_string(),
            format: format.to_string(),
            status: self.status(),
            percent: self.percent.load(Ordering::SeqCst),
            error: self.error(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: u64,
    pub url: String,
    pub format: String,
    pub status: TaskStatus,
    pub percent: u8,
    pub error: Option<String>,
}

struct TaskEntry {
    key: String,
    url: String,
    format: String,
    shared: Arc<TaskShared>,
}

type Registry = Arc<Mutex<HashMap<u64, TaskEntry>>>;

pub struct TaskHandle {
    id: u64,
    url: String,
    format: String,
    shared: Arc<TaskShared>,
    events: TaskEvents,
    thread: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn status(&self) -> TaskStatus {
        self.shared.status()
    }

    pub fn percent(&self) -> u8 {
        self.shared.percent.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<String> {
        self.shared.error()
    }

    pub fn summary(&self) -> TaskSummary {
        self.shared.summary(self.id, &self.url, &self.format)
    }

    pub fn events(&self) -> &TaskEvents {
        &self.events
    }

    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn wait(mut self) -> TaskStatus {
        for _ in self.events.iter() {}
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.shared.status()
    }
}

pub struct Supervisor {
    paths: AppPaths,
    config: EngineConfig,
    policy: FormatPolicy,
    engine: Arc<dyn ExtractionEngine>,
    committer: Arc<Mutex<MetadataCommitter>>,
    session: String,
    next_id: AtomicU64,
    tasks: Registry,
}

impl Supervisor {
    pub fn new(
        paths: AppPaths,
        config: EngineConfig,
        engine: Arc<dyn ExtractionEngine>,
        committer: MetadataCommitter,
    ) -> Self {
        let policy = FormatPolicy::new(config.format_overrides.clone());
        Self {
            paths,
            config,
            policy,
            engine,
            committer: Arc::new(Mutex::new(committer)),
            session: uuid::Uuid::new_v4().simple().to_string(),
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn open(paths: AppPaths) -> Result<Self> {
        paths.ensure_dirs()?;
        let config = load_engine_config(&paths)?;
        let store = ensure_schema(&paths)?;

        let engine: Arc<dyn ExtractionEngine> =
            Arc::new(YtDlpEngine::new(paths.clone(), config.probe_timeout_secs));
        let comments: Option<Arc<dyn CommentSource>> = if config.fetch_comments {
            Some(Arc::new(EngineComments::new(
                engine.clone(),
                config.fetch_options(&paths),
            )))
        } else {
            None
        };
        let committer = MetadataCommitter::new(
            store,
            Arc::new(HttpThumbnails::new(config.thumbnail_timeout_secs)),
            comments,
        );
        Ok(Self::new(paths, config, engine, committer))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &FormatPolicy {
        &self.policy
    }

    /// Fails without creating a task when the URL is not a supported source or is
    /// already being downloaded.
    pub fn start(&self, url: &str, tier: &QualityTier) -> Result<TaskHandle> {
        let url = url.trim();
        if !is_recognized_url(url) {
            return Err(EngineError::UnrecognizedUrl(url.to_string()));
        }
        let key = normalize_url(url);
        let format = self.policy.resolve(tier);
        let playlist = self.config.allow_playlists && is_playlist_url(url);

        let shared = Arc::new(TaskShared::default());
        let id = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if tasks.values().any(|t| t.key == key) {
                return Err(EngineError::AlreadyDownloading(url.to_string()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            tasks.insert(
                id,
                TaskEntry {
                    key,
                    url: url.to_string(),
                    format: format.clone(),
                    shared: shared.clone(),
                },
            );
            id
        };

        let mut options = if playlist {
            self.config.playlist_fetch_options(&self.paths)
        } else {
            self.config.fetch_options(&self.paths)
        };
        if tier.is_audio_only() {
            // Single audio stream; nothing to merge into a video container.
            options.merge_output_format = None;
        }

        let (tx, events) = event_channel(self.config.event_buffer);
        let task = TaskRun {
            id,
            url: url.to_string(),
            format: format.clone(),
            playlist,
            options,
            fetch_comments: self.config.fetch_comments,
            paths: self.paths.clone(),
            engine: self.engine.clone(),
            committer: self.committer.clone(),
            tasks: self.tasks.clone(),
            shared: shared.clone(),
            log: TaskLog::new(self.paths.task_log_path(&self.session, id), id),
            tx,
        };
        let thread = thread::spawn(move || task.run());

        Ok(TaskHandle {
            id,
            url: url.to_string(),
            format,
            shared,
            events,
            thread: Some(thread),
        })
    }

    pub fn cancel(&self, task_id: u64) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        match tasks.get(&task_id) {
            Some(entry) => {
                entry.shared.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> Vec<TaskSummary> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<TaskSummary> = tasks
            .iter()
            .map(|(id, entry)| entry.shared.summary(*id, &entry.url, &entry.format))
            .collect();
        out.sort_by_key(|t| t.id);
        out
    }
}

fn normalize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

enum Outcome {
    Succeeded(Vec<Video>),
    Failed(String),
    Cancelled,
}

struct TaskRun {
    id: u64,
    url: String,
    format: String,
    playlist: bool,
    options: FetchOptions,
    fetch_comments: bool,
    paths: AppPaths,
    engine: Arc<dyn ExtractionEngine>,
    committer: Arc<Mutex<MetadataCommitter>>,
    tasks: Registry,
    shared: Arc<TaskShared>,
    log: TaskLog,
    tx: EventSender,
}

impl TaskRun {
    fn run(self) {
        self.shared.transition(TaskStatus::Running);
        self.log.info(
            "task_started",
            json!({
                "url": self.url,
                "format": self.format,
                "playlist": self.playlist,
                "working_dir": self.options.working_dir,
            }),
        );

        let outcome = self.execute();
        self.finish(outcome);
    }

    fn execute(&self) -> Outcome {
        let cancel = self.shared.cancel.clone();

        let playlist = if self.playlist {
            match self
                .engine
                .probe_playlist(&self.request(&self.url, &self.options))
            {
                Ok(p) => Some(p),
                Err(e) => return Outcome::Failed(format!("playlist probe failed: {e}")),
            }
        } else {
            None
        };
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let (raw_tx, raw_rx) = mpsc::channel::<RawProgress>();
        let worker = {
            let engine = self.engine.clone();
            let options = self.options.clone();
            let url = self.url.clone();
            let format = self.format.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                let request = FetchRequest {
                    url: &url,
                    format: &format,
                    options: &options,
                };
                engine.download(&request, &cancel, &mut |raw| {
                    let _ = raw_tx.send(raw);
                })
            })
        };

        let callbacks = Callbacks {
            rx: raw_rx,
            cancel: cancel.clone(),
        };
        let mut pending: Vec<FinishedItem> = Vec::new();
        let mut failure: Option<String> = None;
        let mut last_percent: Option<u8> = None;

        let translator =
            ProgressTranslator::new(callbacks, |raw: &RawProgress| self.probe_item(raw));
        for event in translator {
            match event {
                ProgressEvent::Progress(pct) => {
                    if last_percent == Some(pct) {
                        continue;
                    }
                    if last_percent.map(|p| p / 10) != Some(pct / 10) {
                        self.log.info("engine_progress", json!({ "percent": pct }));
                    }
                    last_percent = Some(pct);
                    self.shared.percent.store(pct, Ordering::SeqCst);
                    self.tx.progress(pct);
                }
                ProgressEvent::ItemFinished(item) => {
                    let mut item = *item;
                    item.local_path = self.paths.resolve_output(&item.local_path);
                    self.item_finished(&item, false);
                    pending.push(item);
                }
                ProgressEvent::Failed(reason) => {
                    failure = Some(reason);
                    cancel.cancel();
                }
            }
        }

        let engine_result = match worker.join() {
            Ok(result) => result,
            Err(_) => Err(EngineError::ExternalToolFailed {
                tool: "extraction engine".to_string(),
                code: None,
                stderr: "engine worker panicked".to_string(),
            }),
        };

        if let Some(reason) = failure {
            return Outcome::Failed(reason);
        }
        if cancel.is_cancelled() || matches!(engine_result, Err(EngineError::Canceled)) {
            return Outcome::Cancelled;
        }
        let report = match engine_result {
            Ok(report) => report,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        if let Err(e) = self.adopt_reported_outputs(&report, &mut pending) {
            return Outcome::Failed(e.to_string());
        }
        if pending.is_empty() {
            return Outcome::Failed("engine finished without producing any item".to_string());
        }

        let mut warnings = Vec::new();
        let committed = self.commit_all(playlist.as_ref(), &pending, &mut warnings);
        for warning in warnings {
            self.log.warn(
                "commit_warning",
                serde_json::to_value(&warning).unwrap_or_default(),
            );
            self.tx.send(TaskEvent::Warning(warning));
        }
        match committed {
            Ok(videos) => Outcome::Succeeded(videos),
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    fn request<'a>(&'a self, url: &'a str, options: &'a FetchOptions) -> FetchRequest<'a> {
        FetchRequest {
            url,
            format: &self.format,
            options,
        }
    }

    fn probe_options(&self) -> FetchOptions {
        FetchOptions {
            skip_download: true,
            fetch_comments: self.fetch_comments,
            allow_playlist: false,
            ..self.options.clone()
        }
    }

    fn probe_item(&self, raw: &RawProgress) -> Result<Manifest> {
        let url = raw
            .item_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(self.url.as_str());
        let options = self.probe_options();
        self.engine.probe(&self.request(url, &options))
    }

    fn item_finished(&self, item: &FinishedItem, resumed: bool) {
        self.log.info(
            "item_finished",
            json!({
                "external_id": item.manifest.id,
                "local_path": item.local_path,
                "resumed": resumed,
            }),
        );
        self.tx.send(TaskEvent::ItemFinished {
            external_id: item.manifest.id.clone(),
            local_path: item.local_path.clone(),
        });
    }

    /// Applies the engine's final output paths and picks up items that were already
    /// complete on disk and so never reported `finished`.
    fn adopt_reported_outputs(
        &self,
        report: &DownloadReport,
        pending: &mut Vec<FinishedItem>,
    ) -> Result<()> {
        for (item_id, path) in &report.outputs {
            if pending.iter().any(|p| &p.manifest.id == item_id) {
                continue;
            }
            let url = format!("https://www.youtube.com/watch?v={item_id}");
            let options = self.probe_options();
            let manifest = self.engine.probe(&self.request(&url, &options))?;
            let item = FinishedItem {
                manifest,
                local_path: self.paths.resolve_output(path),
            };
            self.item_finished(&item, true);
            pending.push(item);
        }

        for item in pending.iter_mut() {
            if let Some(path) = report.output_for(&item.manifest.id) {
                item.local_path = self.paths.resolve_output(path);
            }
        }
        Ok(())
    }

    fn commit_all(
        &self,
        playlist: Option<&PlaylistManifest>,
        pending: &[FinishedItem],
        warnings: &mut Vec<CommitWarning>,
    ) -> Result<Vec<Video>> {
        let committer = self
            .committer
            .lock()
            .map_err(|_| EngineError::Commit("committer lock poisoned".to_string()))?;

        let playlist_id = match playlist {
            Some(manifest) => {
                let list_path = pending
                    .first()
                    .and_then(|item| item.local_path.parent())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(PathBuf::new);
                let (row, playlist_warnings) = committer.commit_playlist(manifest, &list_path)?;
                self.log.info(
                    "commit_succeeded",
                    json!({ "playlist_id": row.id, "external_id": row.external_id }),
                );
                warnings.extend(playlist_warnings);
                Some(row.id)
            }
            None => None,
        };

        let mut videos = Vec::with_capacity(pending.len());
        for item in pending {
            let outcome = committer
                .commit(&item.manifest, &item.local_path, playlist_id)
                .map_err(|e| match e {
                    EngineError::Commit(msg) => {
                        EngineError::Commit(format!("{}: {msg}", item.manifest.id))
                    }
                    other => other,
                })?;
            self.log.info(
                "commit_succeeded",
                json!({
                    "video_id": outcome.video.id,
                    "external_id": outcome.video.external_id,
                    "created": outcome.created,
                    "comments": outcome.comments_saved,
                }),
            );
            warnings.extend(outcome.warnings);
            videos.push(outcome.video);
        }
        Ok(videos)
    }

    fn finish(self, outcome: Outcome) {
        let (status, event) = match outcome {
            Outcome::Succeeded(videos) => {
                self.log.info("task_succeeded", json!({ "videos": videos.len() }));
                (TaskStatus::Succeeded, TaskEvent::Succeeded { videos })
            }
            Outcome::Failed(reason) => {
                self.log.error("task_failed", json!({ "reason": reason }));
                self.shared.set_error(&reason);
                (TaskStatus::Failed, TaskEvent::Failed { reason })
            }
            Outcome::Cancelled => {
                self.log.info("task_cancelled", json!({}));
                (TaskStatus::Cancelled, TaskEvent::Cancelled)
            }
        };

        self.shared.transition(status);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        self.tx.send(event);
    }
}

struct Callbacks {
    rx: Receiver<RawProgress>,
    cancel: CancelToken,
}

impl Iterator for Callbacks {
    type Item = RawProgress;

    fn next(&mut self) -> Option<RawProgress> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            match self
                .rx
                .recv_timeout(Duration::from_millis(CALLBACK_POLL_INTERVAL_MS))
            {
                Ok(raw) => return Some(raw),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sinks() {
        use TaskStatus::*;
        assert!(Idle.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Cancelled));
        assert!(!Running.can_transition_to(Idle));
        for terminal in [Succeeded, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Idle, Running, Succeeded, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn shared_status_refuses_illegal_transitions() {
        let shared = TaskShared::default();
        assert_eq!(shared.status(), TaskStatus::Idle);
        assert!(shared.transition(TaskStatus::Running));
        assert!(shared.transition(TaskStatus::Failed));
        assert!(!shared.transition(TaskStatus::Succeeded));
        assert_eq!(shared.status(), TaskStatus::Failed);
    }

    #[test]
    fn status_round_trips_through_u8() {
        for status in [
            TaskStatus::Idle,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_u8(status.as_u8()), status);
        }
        assert_eq!(TaskStatus::Cancelled.as_str(), "cancelled");
    }

    #[test]
    fn normalized_urls_ignore_fragments() {
        assert_eq!(
            normalize_url("https://YouTube.com/watch?v=x#t=10"),
            normalize_url("https://youtube.com/watch?v=x")
        );
        assert_ne!(
            normalize_url("https://youtube.com/watch?v=x"),
            normalize_url("https://youtube.com/watch?v=y")
        );
    }

    #[test]
    fn callbacks_stop_on_cancel_and_hang_up() {
        let (tx, rx) = mpsc::channel();
        tx.send(RawProgress::downloading(1.0, Some(2.0))).expect("send");
        drop(tx);
        let cancel = CancelToken::new();
        let items: Vec<_> = Callbacks {
            rx,
            cancel: cancel.clone(),
        }
        .collect();
        assert_eq!(items.len(), 1);

        let (_tx, rx) = mpsc::channel::<RawProgress>();
        cancel.cancel();
        let mut callbacks = Callbacks { rx, cancel };
        assert!(callbacks.next().is_none());
    }

    #[test]
    fn queued_progress_is_capped_until_the_reader_catches_up() {
        let (tx, events) = event_channel(2);
        assert!(tx.progress(10));
        assert!(tx.progress(20));
        assert!(!tx.progress(30));
        tx.send(TaskEvent::Cancelled);

        assert_eq!(events.try_recv().expect("first"), TaskEvent::Progress(10));
        assert!(tx.progress(40));
        assert!(!tx.progress(50));

        let rest: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(
            rest,
            vec![
                TaskEvent::Progress(20),
                TaskEvent::Cancelled,
                TaskEvent::Progress(40),
            ]
        );
    }

    #[test]
    fn summary_carries_the_failure_reason() {
        let shared = TaskShared::default();
        assert!(shared.summary(1, "u", "f").error.is_none());
        shared.transition(TaskStatus::Running);
        shared.set_error("probe failed: offline");
        shared.transition(TaskStatus::Failed);
        let summary = shared.summary(1, "u", "f");
        assert_eq!(summary.status, TaskStatus::Failed);
        assert_eq!(summary.error.as_deref(), Some("probe failed: offline"));
    }
}
