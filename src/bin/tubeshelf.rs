use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use tubeshelf_engine::config::load_engine_config;
use tubeshelf_engine::db;
use tubeshelf_engine::format::QualityTier;
use tubeshelf_engine::library::{local_media_files, Catalog, CatalogWatcher};
use tubeshelf_engine::paths::AppPaths;
use tubeshelf_engine::supervisor::{Supervisor, TaskEvent, TaskStatus};

enum Command {
    Download { url: String, quality: String },
    List,
    Watch,
    Comments { video_id: i64 },
    Formats,
}

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut base_dir: Option<PathBuf> = None;
    let mut quality = "720p".to_string();
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--base-dir" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--base-dir requires a value".to_string())?;
                base_dir = Some(PathBuf::from(v));
            }
            "--quality" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--quality requires a value".to_string())?;
                quality = v.to_string();
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown arg: {other} (try --help)"))
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let command = match positional.first().map(String::as_str) {
        Some("download") => Command::Download {
            url: positional
                .get(1)
                .cloned()
                .ok_or_else(|| "download requires a url".to_string())?,
            quality,
        },
        Some("list") => Command::List,
        Some("watch") => Command::Watch,
        Some("comments") => Command::Comments {
            video_id: positional
                .get(1)
                .ok_or_else(|| "comments requires a video id".to_string())?
                .parse::<i64>()
                .map_err(|e| format!("invalid video id: {e}"))?,
        },
        Some("formats") => Command::Formats,
        Some(other) => return Err(format!("unknown command: {other} (try --help)")),
        None => return Err("missing command (try --help)".to_string()),
    };

    let base_dir = base_dir
        .or_else(default_base_dir)
        .ok_or_else(|| "could not determine base dir; pass --base-dir".to_string())?;
    let paths = AppPaths::new(base_dir);
    paths.ensure_dirs().map_err(|e| e.to_string())?;

    match command {
        Command::Download { url, quality } => download(paths, &url, &quality),
        Command::List => list(&paths),
        Command::Watch => watch(&paths),
        Command::Comments { video_id } => comments(&paths, video_id),
        Command::Formats => formats(paths),
    }
}

fn download(paths: AppPaths, url: &str, quality: &str) -> Result<(), String> {
    let supervisor = Supervisor::open(paths).map_err(|e| e.to_string())?;
    let tier = QualityTier::parse(quality);
    let poll = Duration::from_millis(supervisor.config().progress_poll_ms.max(50));

    let handle = supervisor.start(url, &tier).map_err(|e| e.to_string())?;
    println!("Task {}: {} ({})", handle.id(), handle.url(), handle.format());

    let mut shown: Option<u8> = None;
    let mut failure: Option<String> = None;
    loop {
        match handle.events().recv_timeout(poll) {
            Ok(TaskEvent::Progress(_)) | Err(RecvTimeoutError::Timeout) => {
                let pct = handle.percent();
                if shown != Some(pct) && handle.status() == TaskStatus::Running {
                    println!("  {pct:>3}%");
                    shown = Some(pct);
                }
            }
            Ok(TaskEvent::ItemFinished {
                external_id,
                local_path,
            }) => {
                println!("  finished {external_id} -> {}", local_path.to_string_lossy());
            }
            Ok(TaskEvent::Warning(w)) => {
                eprintln!("  warning ({:?}) {}: {}", w.kind, w.external_id, w.message);
            }
            Ok(TaskEvent::Succeeded { videos }) => {
                for video in &videos {
                    println!("Saved #{} {} -> {}", video.id, video.title, video.file_path);
                }
                break;
            }
            Ok(TaskEvent::Failed { reason }) => {
                failure = Some(reason);
                break;
            }
            Ok(TaskEvent::Cancelled) => {
                failure = Some("canceled".to_string());
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = handle.wait();
    match failure {
        Some(reason) => Err(format!("download {}: {reason}", status.as_str())),
        None => Ok(()),
    }
}

fn list(paths: &AppPaths) -> Result<(), String> {
    let catalog = Catalog::new(db::ensure_schema(paths).map_err(|e| e.to_string())?);
    let videos = catalog.snapshot().map_err(|e| e.to_string())?;
    if videos.is_empty() {
        println!("Library is empty.");
    }
    for video in &videos {
        println!(
            "#{:<5} {:<12} {}  [{}]",
            video.id, video.external_id, video.title, video.file_path
        );
    }

    let files = local_media_files(paths).map_err(|e| e.to_string())?;
    let untracked: Vec<_> = files
        .iter()
        .filter(|f| !videos.iter().any(|v| Path::new(&v.file_path) == f.as_path()))
        .collect();
    if !untracked.is_empty() {
        println!("Untracked files in {}:", paths.videos_dir().to_string_lossy());
        for f in untracked {
            println!("  {}", f.to_string_lossy());
        }
    }
    Ok(())
}

fn watch(paths: &AppPaths) -> Result<(), String> {
    let config = load_engine_config(paths).map_err(|e| e.to_string())?;
    let catalog = Catalog::new(db::ensure_schema(paths).map_err(|e| e.to_string())?);
    let watcher = CatalogWatcher::spawn(
        catalog,
        Duration::from_millis(config.catalog_poll_ms.max(100)),
    );
    println!("Watching library (Ctrl+C to stop)...");
    for videos in watcher.updates().iter() {
        println!("{} videos", videos.len());
        if let Some(latest) = videos.last() {
            println!("  latest: #{} {}", latest.id, latest.title);
        }
    }
    Ok(())
}

fn comments(paths: &AppPaths, video_id: i64) -> Result<(), String> {
    let catalog = Catalog::new(db::ensure_schema(paths).map_err(|e| e.to_string())?);
    let video = catalog
        .video(video_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no video with id {video_id}"))?;
    let comments = catalog.comments_for(video.id).map_err(|e| e.to_string())?;
    println!("{} ({} comments)", video.title, comments.len());
    for c in comments {
        println!("  [{}] {}: {}", c.like_count, c.author, c.text);
    }
    Ok(())
}

fn formats(paths: AppPaths) -> Result<(), String> {
    let supervisor = Supervisor::open(paths).map_err(|e| e.to_string())?;
    for (tier, expr) in supervisor.policy().table() {
        println!("{:<16} {}", tier.as_str(), expr);
    }
    Ok(())
}

fn default_base_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var("TUBESHELF_BASE_DIR") {
        let t = v.trim();
        if !t.is_empty() {
            return Some(PathBuf::from(t));
        }
    }

    if cfg!(windows) {
        if let Ok(appdata) = std::env::var("APPDATA") {
            let t = appdata.trim();
            if !t.is_empty() {
                return Some(PathBuf::from(t).join("tubeshelf"));
            }
        }
    }

    None
}

fn print_help() {
    println!(
        r#"tubeshelf

Downloads YouTube videos and playlists into a local library with metadata,
thumbnails and comments.

Usage:
  tubeshelf download <url> [--quality <tier>]
  tubeshelf list
  tubeshelf watch
  tubeshelf comments <video-id>
  tubeshelf formats

Options:
  --base-dir <path>   Data directory (default: $TUBESHELF_BASE_DIR, or %APPDATA%\tubeshelf on Windows)
  --quality <tier>    144p, 360p, 480p, 720p, 1080p, 4K, audio-only-m4a, audio-only-webm (default 720p)
"#
    );
}
