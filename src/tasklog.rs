use crate::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const TASK_LOG_ROTATE_BYTES: u64 = 50 * 1024 * 1024;
const TASK_LOG_MAX_BACKUPS: usize = 3;

#[derive(Debug, Clone)]
pub struct TaskLog {
    path: PathBuf,
    task_id: u64,
}

impl TaskLog {
    pub fn new(path: PathBuf, task_id: u64) -> Self {
        Self { path, task_id }
    }

    pub fn info(&self, event: &str, data: serde_json::Value) {
        let _ = self.write("info", event, data);
    }

    pub fn warn(&self, event: &str, data: serde_json::Value) {
        let _ = self.write("warn", event, data);
    }

    pub fn error(&self, event: &str, data: serde_json::Value) {
        let _ = self.write("error", event, data);
    }

    fn write(&self, level: &str, event: &str, data: serde_json::Value) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "task_id": self.task_id,
            "level": level,
            "event": event,
            "data": data
        })
        .to_string();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_if_needed(&self.path, TASK_LOG_ROTATE_BYTES, TASK_LOG_MAX_BACKUPS)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

/// Moves an oversized log to `.1`, shifting older backups up and dropping the
/// one past `keep`.
fn rotate_if_needed(path: &Path, limit_bytes: u64, keep: usize) -> std::io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() >= limit_bytes => {}
        _ => return Ok(()),
    }
    if keep == 0 {
        return std::fs::remove_file(path);
    }

    let oldest = backup_path(path, keep);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    for n in (1..keep).rev() {
        let from = backup_path(path, n);
        if from.exists() {
            std::fs::rename(&from, backup_path(path, n + 1))?;
        }
    }
    std::fs::rename(path, backup_path(path, 1))
}

fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    path.with_file_name(name)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_json_with_task_and_level() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tasks").join("s-7.jsonl");
        let log = TaskLog::new(path.clone(), 7);

        log.info("task_started", serde_json::json!({ "url": "https://youtu.be/x" }));
        log.warn("commit_warning", serde_json::json!({ "kind": "thumbnail" }));

        let raw = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["task_id"], 7);
        assert_eq!(lines[0]["event"], "task_started");
        assert_eq!(lines[1]["level"], "warn");
    }

    #[test]
    fn rotation_shifts_backups_and_drops_the_oldest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("task.jsonl");
        std::fs::write(&log, "current").expect("write log");
        for (n, body) in [(1, "one"), (2, "two"), (3, "three")] {
            std::fs::write(backup_path(&log, n), body).expect("write backup");
        }

        rotate_if_needed(&log, 1, 3).expect("rotate");

        assert!(!log.exists());
        let read = |n| std::fs::read_to_string(backup_path(&log, n)).expect("backup");
        assert_eq!(read(1), "current");
        assert_eq!(read(2), "one");
        assert_eq!(read(3), "two");
        assert!(!backup_path(&log, 4).exists());
    }

    #[test]
    fn small_logs_stay_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("task.jsonl");
        std::fs::write(&path, "0123").expect("write");

        rotate_if_needed(&path, 5, 3).expect("no-op");
        assert!(path.exists());
        assert!(!backup_path(&path, 1).exists());

        std::fs::write(&path, "0123456789").expect("write");
        rotate_if_needed(&path, 5, 3).expect("rotate");
        assert!(!path.exists());
        assert_eq!(
            std::fs::read_to_string(backup_path(&path, 1)).expect("backup"),
            "0123456789"
        );
    }

    #[test]
    fn missing_log_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        rotate_if_needed(&dir.path().join("absent.jsonl"), 0, 3).expect("rotate");
    }
}
