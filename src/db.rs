use crate::paths::AppPaths;
use crate::Result;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Handle to the catalog database. Each call to [`Store::connect`] opens a fresh
/// connection, so readers never share state with the single writer.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn open(paths: &AppPaths) -> Result<Self> {
        paths.ensure_dirs()?;
        Self::at(paths.db_path())
    }

    pub fn at(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            db_path: db_path.into(),
        };
        let conn = store.connect()?;
        migrate(&conn)?;
        Ok(store)
    }

    pub fn connect(&self) -> Result<Connection> {
        open_path(&self.db_path)
    }
}

fn open_path(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )?;

    conn.busy_timeout(Duration::from_secs(10))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS playlist (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  external_id TEXT NOT NULL UNIQUE CHECK (length(trim(external_id)) > 0),
  title TEXT NOT NULL,
  description TEXT NOT NULL,
  thumbnail BLOB NOT NULL,
  list_path TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS video (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  external_id TEXT NOT NULL UNIQUE CHECK (length(trim(external_id)) > 0),
  title TEXT NOT NULL,
  description TEXT NOT NULL,
  thumbnail BLOB NOT NULL,
  file_path TEXT NOT NULL,
  playlist_id INTEGER,
  created_at_ms INTEGER NOT NULL,
  FOREIGN KEY (playlist_id) REFERENCES playlist(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS comment (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  video_id INTEGER NOT NULL,
  external_id INTEGER NOT NULL,
  source_id TEXT NOT NULL,
  author TEXT NOT NULL,
  text TEXT NOT NULL,
  like_count INTEGER NOT NULL,
  created_at_ms INTEGER NOT NULL,
  FOREIGN KEY (video_id) REFERENCES video(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_video_created ON video(created_at_ms);
CREATE INDEX IF NOT EXISTS idx_video_playlist ON video(playlist_id);
CREATE INDEX IF NOT EXISTS idx_comment_video ON comment(video_id);
"#,
    )?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(v) if v == CURRENT_SCHEMA_VERSION.to_string() => {}
        _ => {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES('schema_version', ?)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                [CURRENT_SCHEMA_VERSION.to_string()],
            )?;
        }
    }

    Ok(())
}

pub fn ensure_schema(paths: &AppPaths) -> Result<Store> {
    Store::open(paths)
}

pub(crate) trait OptionalRowExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalRowExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
