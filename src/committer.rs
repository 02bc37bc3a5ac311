use crate::db::{OptionalRowExt, Store};
use crate::engine::{
    ExtractionEngine, FetchOptions, FetchRequest, Manifest, PlaylistManifest, RawComment,
};
use crate::library::{
    playlist_from_row, video_from_row, Playlist, Video, PLAYLIST_COLUMNS, VIDEO_COLUMNS,
};
use crate::{EngineError, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const THUMBNAIL_MAX_BYTES: u64 = 16 * 1024 * 1024;

pub trait ThumbnailSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub trait CommentSource: Send + Sync {
    fn comments(&self, manifest: &Manifest) -> Result<Vec<RawComment>>;
}

#[derive(Debug, Clone)]
pub struct HttpThumbnails {
    agent: ureq::Agent,
}

impl HttpThumbnails {
    pub fn new(timeout_secs: u64) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(timeout_secs.max(1))))
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl ThumbnailSource for HttpThumbnails {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .agent
            .get(url)
            .call()
            .map_err(|e| EngineError::Http(format!("thumbnail request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::Http(format!(
                "thumbnail request failed (status={status})"
            )));
        }

        let mut bytes = Vec::new();
        resp.into_body()
            .into_reader()
            .take(THUMBNAIL_MAX_BYTES)
            .read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Comment thread fetched through the extraction engine.
pub struct EngineComments {
    engine: Arc<dyn ExtractionEngine>,
    options: FetchOptions,
}

impl EngineComments {
    pub fn new(engine: Arc<dyn ExtractionEngine>, options: FetchOptions) -> Self {
        Self { engine, options }
    }
}

impl CommentSource for EngineComments {
    fn comments(&self, manifest: &Manifest) -> Result<Vec<RawComment>> {
        let url = manifest
            .webpage_url
            .clone()
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", manifest.id));
        let options = FetchOptions {
            skip_download: true,
            fetch_comments: true,
            allow_playlist: false,
            ..self.options.clone()
        };
        self.engine.fetch_comments(&FetchRequest {
            url: &url,
            format: "",
            options: &options,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Thumbnail,
    Comments,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitWarning {
    pub kind: WarningKind,
    pub external_id: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub video: Video,
    /// False when a row with the same external id already existed.
    pub created: bool,
    pub comments_saved: usize,
    pub warnings: Vec<CommitWarning>,
}

/// Numeric comment id, or 0 when the provider id is not purely decimal digits.
pub fn parse_comment_id(raw: &str) -> i64 {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }
    raw.parse::<i64>().unwrap_or(0)
}

/// Sole writer of Video, Playlist and Comment rows.
pub struct MetadataCommitter {
    store: Store,
    thumbnails: Arc<dyn ThumbnailSource>,
    comments: Option<Arc<dyn CommentSource>>,
}

impl MetadataCommitter {
    pub fn new(
        store: Store,
        thumbnails: Arc<dyn ThumbnailSource>,
        comments: Option<Arc<dyn CommentSource>>,
    ) -> Self {
        Self {
            store,
            thumbnails,
            comments,
        }
    }

    pub fn commit(
        &self,
        manifest: &Manifest,
        local_path: &Path,
        playlist_id: Option<i64>,
    ) -> Result<CommitOutcome> {
        let external_id = manifest.id.trim();
        if external_id.is_empty() {
            return Err(EngineError::Commit("manifest has a blank external id".to_string()));
        }

        let mut conn = self.store.connect().map_err(commit_error)?;
        if let Some(video) = find_video(&conn, external_id).map_err(commit_error)? {
            return Ok(CommitOutcome {
                video,
                created: false,
                comments_saved: 0,
                warnings: Vec::new(),
            });
        }

        let mut warnings = Vec::new();
        let thumbnail = self.thumbnail_or_empty(
            manifest.thumbnail.as_deref(),
            external_id,
            &mut warnings,
        );

        let (video, created) = insert_video(
            &mut conn,
            manifest,
            external_id,
            &thumbnail,
            local_path,
            playlist_id,
        )
        .map_err(commit_error)?;

        let mut comments_saved = 0;
        if created {
            match self.comment_thread(manifest) {
                Ok(Some(thread)) => match insert_comments(&mut conn, video.id, &thread) {
                    Ok(n) => comments_saved = n,
                    Err(e) => warnings.push(CommitWarning {
                        kind: WarningKind::Comments,
                        external_id: external_id.to_string(),
                        message: format!("failed to store comments: {e}"),
                    }),
                },
                Ok(None) => {}
                Err(e) => warnings.push(CommitWarning {
                    kind: WarningKind::Comments,
                    external_id: external_id.to_string(),
                    message: format!("failed to fetch comments: {e}"),
                }),
            }
        }

        Ok(CommitOutcome {
            video,
            created,
            comments_saved,
            warnings,
        })
    }

    /// Inserts the playlist unless one with the same external id already exists.
    pub fn commit_playlist(
        &self,
        manifest: &PlaylistManifest,
        list_path: &Path,
    ) -> Result<(Playlist, Vec<CommitWarning>)> {
        let external_id = manifest.id.trim();
        if external_id.is_empty() {
            return Err(EngineError::Commit("playlist has a blank external id".to_string()));
        }

        let mut conn = self.store.connect().map_err(commit_error)?;
        if let Some(existing) = find_playlist(&conn, external_id).map_err(commit_error)? {
            return Ok((existing, Vec::new()));
        }

        let mut warnings = Vec::new();
        let thumbnail = self.thumbnail_or_empty(
            manifest.thumbnail.as_deref(),
            external_id,
            &mut warnings,
        );

        let playlist = insert_playlist(&mut conn, manifest, external_id, &thumbnail, list_path)
            .map_err(commit_error)?;

        Ok((playlist, warnings))
    }

    fn thumbnail_or_empty(
        &self,
        url: Option<&str>,
        external_id: &str,
        warnings: &mut Vec<CommitWarning>,
    ) -> Vec<u8> {
        let url = match url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(u) => u,
            None => return Vec::new(),
        };
        match self.thumbnails.fetch(url) {
            Ok(bytes) => bytes,
            Err(e) => {
                warnings.push(CommitWarning {
                    kind: WarningKind::Thumbnail,
                    external_id: external_id.to_string(),
                    message: e.to_string(),
                });
                Vec::new()
            }
        }
    }

    fn comment_thread(&self, manifest: &Manifest) -> Result<Option<Vec<RawComment>>> {
        if let Some(comments) = &manifest.comments {
            return Ok(Some(comments.clone()));
        }
        match &self.comments {
            Some(source) => source.comments(manifest).map(Some),
            None => Ok(None),
        }
    }
}

fn commit_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Commit(e.to_string())
}

fn find_video(conn: &Connection, external_id: &str) -> rusqlite::Result<Option<Video>> {
    conn.query_row(
        &format!("SELECT {VIDEO_COLUMNS} FROM video WHERE external_id=?1"),
        params![external_id],
        video_from_row,
    )
    .optional()
}

fn find_playlist(conn: &Connection, external_id: &str) -> rusqlite::Result<Option<Playlist>> {
    conn.query_row(
        &format!("SELECT {PLAYLIST_COLUMNS} FROM playlist WHERE external_id=?1"),
        params![external_id],
        playlist_from_row,
    )
    .optional()
}

fn insert_playlist(
    conn: &mut Connection,
    manifest: &PlaylistManifest,
    external_id: &str,
    thumbnail: &[u8],
    list_path: &Path,
) -> rusqlite::Result<Playlist> {
    let tx = conn.transaction()?;
    tx.execute(
        r#"
INSERT INTO playlist (external_id, title, description, thumbnail, list_path, created_at_ms)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(external_id) DO NOTHING
"#,
        params![
            external_id,
            &manifest.title,
            &manifest.description,
            thumbnail,
            list_path.to_string_lossy().to_string(),
            now_ms(),
        ],
    )?;
    let playlist = tx.query_row(
        &format!("SELECT {PLAYLIST_COLUMNS} FROM playlist WHERE external_id=?1"),
        params![external_id],
        playlist_from_row,
    )?;
    tx.commit()?;
    Ok(playlist)
}

fn insert_video(
    conn: &mut Connection,
    manifest: &Manifest,
    external_id: &str,
    thumbnail: &[u8],
    local_path: &Path,
    playlist_id: Option<i64>,
) -> rusqlite::Result<(Video, bool)> {
    let tx = conn.transaction()?;
    let inserted = tx.execute(
        r#"
INSERT INTO video (external_id, title, description, thumbnail, file_path, playlist_id, created_at_ms)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(external_id) DO NOTHING
"#,
        params![
            external_id,
            &manifest.title,
            &manifest.description,
            thumbnail,
            local_path.to_string_lossy().to_string(),
            playlist_id,
            now_ms(),
        ],
    )?;
    let video = tx.query_row(
        &format!("SELECT {VIDEO_COLUMNS} FROM video WHERE external_id=?1"),
        params![external_id],
        video_from_row,
    )?;
    tx.commit()?;
    Ok((video, inserted == 1))
}

fn insert_comments(
    conn: &mut Connection,
    video_id: i64,
    comments: &[RawComment],
) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    let created_at_ms = now_ms();
    {
        let mut stmt = tx.prepare(
            r#"
INSERT INTO comment (video_id, external_id, source_id, author, text, like_count, created_at_ms)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
        )?;
        for c in comments {
            stmt.execute(params![
                video_id,
                parse_comment_id(&c.id),
                &c.id,
                &c.author,
                &c.text,
                c.like_count,
                created_at_ms,
            ])?;
        }
    }
    tx.commit()?;
    Ok(comments.len())
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
    use crate::library::Catalog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticThumbnails(Option<Vec<u8>>);

    impl ThumbnailSource for StaticThumbnails {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>> {
            self.0
                .clone()
                .ok_or_else(|| EngineError::Http("status=404".to_string()))
        }
    }

    struct CountingComments {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CommentSource for CountingComments {
        fn comments(&self, _manifest: &Manifest) -> Result<Vec<RawComment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EngineError::ExternalToolFailed {
                    tool: "yt-dlp".to_string(),
                    code: Some(1),
                    stderr: "comments disabled".to_string(),
                });
            }
            Ok(vec![
                comment("42", "ann", 5),
                comment("abc", "bob", 0),
            ])
        }
    }

    fn comment(id: &str, author: &str, likes: i64) -> RawComment {
        RawComment {
            id: id.to_string(),
            author: author.to_string(),
            text: format!("{author} says hi"),
            like_count: likes,
        }
    }

    fn manifest(id: &str) -> Manifest {
        Manifest {
            id: id.to_string(),
            title: "A title".to_string(),
            description: "A description".to_string(),
            thumbnail: Some("https://i.ytimg.com/vi/x/hq.jpg".to_string()),
            webpage_url: None,
            filename: None,
            comments: None,
        }
    }

    fn setup(
        thumbnail: Option<Vec<u8>>,
        fail_comments: bool,
    ) -> (tempfile::TempDir, MetadataCommitter, Catalog, Arc<CountingComments>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::at(dir.path().join("app.sqlite")).expect("store");
        let comments = Arc::new(CountingComments {
            calls: AtomicUsize::new(0),
            fail: fail_comments,
        });
        let committer = MetadataCommitter::new(
            store.clone(),
            Arc::new(StaticThumbnails(thumbnail)),
            Some(comments.clone() as Arc<dyn CommentSource>),
        );
        (dir, committer, Catalog::new(store), comments)
    }

    #[test]
    fn comment_ids_parse_leniently() {
        assert_eq!(parse_comment_id("42"), 42);
        assert_eq!(parse_comment_id("abc"), 0);
        assert_eq!(parse_comment_id(""), 0);
        assert_eq!(parse_comment_id("-3"), 0);
        assert_eq!(parse_comment_id("UgzKx3.reply1"), 0);
        assert_eq!(parse_comment_id("99999999999999999999999"), 0);
    }

    #[test]
    fn commit_persists_video_and_comment_batch() {
        let (_dir, committer, catalog, _) = setup(Some(vec![0xff, 0xd8]), false);

        let outcome = committer
            .commit(&manifest("vid1"), Path::new("/w/videos/A title.mp4"), None)
            .expect("commit");
        assert!(outcome.created);
        assert_eq!(outcome.comments_saved, 2);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.video.thumbnail, vec![0xff, 0xd8]);
        assert_eq!(outcome.video.file_path, "/w/videos/A title.mp4");

        let comments = catalog.comments_for(outcome.video.id).expect("comments");
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].external_id, 42);
        assert_eq!(comments[1].external_id, 0);
        assert_eq!(comments[1].source_id, "abc");
        assert!(comments.iter().all(|c| c.video_id == outcome.video.id));
    }

    #[test]
    fn second_commit_of_same_external_id_is_a_no_op() {
        let (_dir, committer, catalog, comments) = setup(Some(Vec::new()), false);

        let first = committer
            .commit(&manifest("vid1"), Path::new("/w/a.mp4"), None)
            .expect("first");
        let second = committer
            .commit(&manifest("vid1"), Path::new("/w/a.mp4"), None)
            .expect("second");

        assert!(!second.created);
        assert_eq!(first.video.id, second.video.id);
        assert_eq!(catalog.count().expect("count"), 1);
        assert_eq!(catalog.comments_for(first.video.id).expect("comments").len(), 2);
        assert_eq!(comments.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn thumbnail_failure_degrades_to_empty_blob() {
        let (_dir, committer, _catalog, _) = setup(None, false);

        let outcome = committer
            .commit(&manifest("vid1"), Path::new("/w/a.mp4"), None)
            .expect("commit");
        assert!(outcome.video.thumbnail.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, WarningKind::Thumbnail);
    }

    #[test]
    fn comment_failure_keeps_video_and_warns() {
        let (_dir, committer, catalog, _) = setup(Some(Vec::new()), true);

        let outcome = committer
            .commit(&manifest("vid1"), Path::new("/w/a.mp4"), None)
            .expect("commit");
        assert!(outcome.created);
        assert_eq!(outcome.comments_saved, 0);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, WarningKind::Comments);
        assert_eq!(catalog.count().expect("count"), 1);
    }

    #[test]
    fn manifest_comments_skip_the_comment_source() {
        let (_dir, committer, catalog, comments) = setup(Some(Vec::new()), false);
        let mut m = manifest("vid1");
        m.comments = Some(vec![comment("7", "cy", 1)]);

        let outcome = committer
            .commit(&m, Path::new("/w/a.mp4"), None)
            .expect("commit");
        assert_eq!(outcome.comments_saved, 1);
        assert_eq!(comments.calls.load(Ordering::SeqCst), 0);
        assert_eq!(catalog.comments_for(outcome.video.id).expect("comments")[0].external_id, 7);
    }

    #[test]
    fn blank_external_id_is_never_committed() {
        let (_dir, committer, catalog, _) = setup(Some(Vec::new()), false);

        let res = committer.commit(&manifest("   "), Path::new("/w/a.mp4"), None);
        assert!(matches!(res, Err(EngineError::Commit(_))));
        assert_eq!(catalog.count().expect("count"), 0);
    }

    #[test]
    fn missing_playlist_reference_fails_without_rows() {
        let (_dir, committer, catalog, comments) = setup(Some(Vec::new()), false);

        let res = committer.commit(&manifest("vid1"), Path::new("/w/a.mp4"), Some(404));
        assert!(matches!(res, Err(EngineError::Commit(_))));
        assert_eq!(catalog.count().expect("count"), 0);
        assert_eq!(comments.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn playlist_commit_is_idempotent_and_links_videos() {
        let (_dir, committer, catalog, _) = setup(Some(vec![1]), false);
        let playlist = PlaylistManifest {
            id: "PL1".to_string(),
            title: "Mix".to_string(),
            description: String::new(),
            thumbnail: None,
            entry_count: 2,
        };

        let (first, _) = committer
            .commit_playlist(&playlist, Path::new("/w/playlists/Mix"))
            .expect("playlist");
        let (again, _) = committer
            .commit_playlist(&playlist, Path::new("/w/playlists/Mix"))
            .expect("playlist again");
        assert_eq!(first.id, again.id);
        assert!(first.thumbnail.is_empty());

        committer
            .commit(&manifest("a"), Path::new("/w/playlists/Mix/001 - a.mp4"), Some(first.id))
            .expect("video a");
        committer
            .commit(&manifest("b"), Path::new("/w/playlists/Mix/002 - b.mp4"), Some(first.id))
            .expect("video b");

        assert_eq!(catalog.playlists().expect("playlists").len(), 1);
        assert_eq!(catalog.videos_in_playlist(first.id).expect("videos").len(), 2);
    }
}
