use crate::db::{OptionalRowExt, Store};
use crate::paths::AppPaths;
use crate::Result;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip)]
    pub thumbnail: Vec<u8>,
    pub file_path: String,
    pub playlist_id: Option<i64>,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip)]
    pub thumbnail: Vec<u8>,
    pub list_path: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub video_id: i64,
    /// Provider id as a number; 0 when the provider id is not numeric.
    pub external_id: i64,
    pub source_id: String,
    pub author: String,
    pub text: String,
    pub like_count: i64,
}

pub(crate) const VIDEO_COLUMNS: &str =
    "id, external_id, title, description, thumbnail, file_path, playlist_id, created_at_ms";
pub(crate) const PLAYLIST_COLUMNS: &str =
    "id, external_id, title, description, thumbnail, list_path, created_at_ms";

pub(crate) fn video_from_row(row: &Row<'_>) -> rusqlite::Result<Video> {
    Ok(Video {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        thumbnail: row.get(4)?,
        file_path: row.get(5)?,
        playlist_id: row.get(6)?,
        created_at_ms: row.get(7)?,
    })
}

pub(crate) fn playlist_from_row(row: &Row<'_>) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        thumbnail: row.get(4)?,
        list_path: row.get(5)?,
        created_at_ms: row.get(6)?,
    })
}

/// Read side of the catalog. Any number of these may run next to the single writer.
#[derive(Debug, Clone)]
pub struct Catalog {
    store: Store,
}

impl Catalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn snapshot(&self) -> Result<Vec<Video>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {VIDEO_COLUMNS} FROM video ORDER BY created_at_ms ASC, id ASC"
        ))?;
        let videos = stmt
            .query_map([], video_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.store.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM video", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Cheap change probe against the last rendered row count.
    ///
    /// A same-count replace-in-place change is not detected.
    pub fn has_changed(&self, last_known_count: i64) -> Result<bool> {
        Ok(self.count()? != last_known_count)
    }

    pub fn video(&self, video_id: i64) -> Result<Option<Video>> {
        let conn = self.store.connect()?;
        let video = conn
            .query_row(
                &format!("SELECT {VIDEO_COLUMNS} FROM video WHERE id=?1"),
                params![video_id],
                video_from_row,
            )
            .optional()?;
        Ok(video)
    }

    pub fn comments_for(&self, video_id: i64) -> Result<Vec<Comment>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(
            r#"
SELECT id, video_id, external_id, source_id, author, text, like_count
FROM comment
WHERE video_id=?1
ORDER BY id ASC
"#,
        )?;
        let comments = stmt
            .query_map(params![video_id], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    video_id: row.get(1)?,
                    external_id: row.get(2)?,
                    source_id: row.get(3)?,
                    author: row.get(4)?,
                    text: row.get(5)?,
                    like_count: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    pub fn playlists(&self) -> Result<Vec<Playlist>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLAYLIST_COLUMNS} FROM playlist ORDER BY created_at_ms ASC, id ASC"
        ))?;
        let playlists = stmt
            .query_map([], playlist_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(playlists)
    }

    pub fn videos_in_playlist(&self, playlist_id: i64) -> Result<Vec<Video>> {
        let conn = self.store.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {VIDEO_COLUMNS} FROM video WHERE playlist_id=?1 ORDER BY created_at_ms ASC, id ASC"
        ))?;
        let videos = stmt
            .query_map(params![playlist_id], video_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }
}

/// Polls the catalog on a fixed cadence and sends a fresh snapshot whenever the row
/// count moves. Stops when dropped or when the receiver goes away.
pub struct CatalogWatcher {
    stop: Arc<AtomicBool>,
    updates: Receiver<Vec<Video>>,
}

impl CatalogWatcher {
    pub fn spawn(catalog: Catalog, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, updates) = mpsc::channel();
        let stop_thread = stop.clone();

        thread::spawn(move || {
            let mut last_count = -1_i64;
            while !stop_thread.load(Ordering::SeqCst) {
                if let Ok(true) = catalog.has_changed(last_count) {
                    if let Ok(videos) = catalog.snapshot() {
                        last_count = videos.len() as i64;
                        if tx.send(videos).is_err() {
                            break;
                        }
                    }
                }
                thread::sleep(interval);
            }
        });

        Self { stop, updates }
    }

    pub fn updates(&self) -> &Receiver<Vec<Video>> {
        &self.updates
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for CatalogWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Media files currently present in the downloads directory, sorted by name.
pub fn local_media_files(paths: &AppPaths) -> Result<Vec<PathBuf>> {
    let dir = paths.videos_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_partial = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e, "part" | "ytdl" | "json"))
            .unwrap_or(false);
        if !is_partial {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_video(store: &Store, external_id: &str, playlist_id: Option<i64>) -> i64 {
        let conn = store.connect().expect("connect");
        conn.execute(
            "INSERT INTO video (external_id, title, description, thumbnail, file_path, playlist_id, created_at_ms)
             VALUES (?1, 'title', 'desc', x'0102', '/tmp/v.mp4', ?2, 1)",
            params![external_id, playlist_id],
        )
        .expect("insert video");
        conn.last_insert_rowid()
    }

    #[test]
    fn has_changed_compares_row_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::at(dir.path().join("app.sqlite")).expect("store");
        let catalog = Catalog::new(store.clone());

        assert!(!catalog.has_changed(0).expect("probe"));
        insert_video(&store, "a", None);
        assert!(catalog.has_changed(0).expect("probe"));
        assert!(!catalog.has_changed(1).expect("probe"));
    }

    #[test]
    fn same_count_replacement_is_not_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::at(dir.path().join("app.sqlite")).expect("store");
        let catalog = Catalog::new(store.clone());

        let id = insert_video(&store, "a", None);
        let conn = store.connect().expect("connect");
        conn.execute("DELETE FROM video WHERE id=?1", params![id])
            .expect("delete");
        insert_video(&store, "b", None);

        assert!(!catalog.has_changed(1).expect("probe"));
        let snapshot = catalog.snapshot().expect("snapshot");
        assert_eq!(snapshot[0].external_id, "b");
    }

    #[test]
    fn snapshot_keeps_insertion_order_and_blobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::at(dir.path().join("app.sqlite")).expect("store");
        let catalog = Catalog::new(store.clone());

        insert_video(&store, "first", None);
        insert_video(&store, "second", None);

        let snapshot = catalog.snapshot().expect("snapshot");
        let ids: Vec<_> = snapshot.iter().map(|v| v.external_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert_eq!(snapshot[0].thumbnail, vec![1, 2]);
        assert!(catalog.video(snapshot[1].id).expect("video").is_some());
        assert!(catalog.video(9999).expect("video").is_none());
    }

    #[test]
    fn watcher_reports_initial_snapshot_and_new_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::at(dir.path().join("app.sqlite")).expect("store");
        let watcher = CatalogWatcher::spawn(Catalog::new(store.clone()), Duration::from_millis(20));

        let initial = watcher
            .updates()
            .recv_timeout(Duration::from_secs(5))
            .expect("initial snapshot");
        assert!(initial.is_empty());

        insert_video(&store, "a", None);
        let next = watcher
            .updates()
            .recv_timeout(Duration::from_secs(5))
            .expect("changed snapshot");
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn local_media_files_skips_partials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().expect("dirs");
        std::fs::write(paths.videos_dir().join("b.mp4"), b"x").expect("write");
        std::fs::write(paths.videos_dir().join("a.webm"), b"x").expect("write");
        std::fs::write(paths.videos_dir().join("c.mp4.part"), b"x").expect("write");
        std::fs::write(paths.videos_dir().join("b.info.json"), b"{}").expect("write");

        let files = local_media_files(&paths).expect("list");
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.webm", "b.mp4"]);
    }
}
