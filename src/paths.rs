use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn engine_config_path(&self) -> PathBuf {
        self.config_dir().join("engine.json")
    }

    pub fn db_dir(&self) -> PathBuf {
        self.base_dir.join("db")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join("app.sqlite")
    }

    /// Engine working directory. Partial downloads and info JSON live here so an
    /// interrupted task can resume instead of fetching from zero.
    pub fn working_dir(&self) -> PathBuf {
        self.base_dir.join("downloads_temp")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.working_dir().join("videos")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn task_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("tasks")
    }

    pub fn task_log_path(&self, session: &str, task_id: u64) -> PathBuf {
        self.task_logs_dir().join(format!("{session}-{task_id}.jsonl"))
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn yt_dlp_bin_path(&self) -> PathBuf {
        let mut path = self.tools_dir().join("yt-dlp").join("yt-dlp");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.db_dir())?;
        std::fs::create_dir_all(self.working_dir())?;
        std::fs::create_dir_all(self.videos_dir())?;
        std::fs::create_dir_all(self.task_logs_dir())?;
        std::fs::create_dir_all(self.tools_dir())?;
        Ok(())
    }

    /// Resolves a path reported by the engine against the working directory.
    pub fn resolve_output(&self, reported: &Path) -> PathBuf {
        if reported.is_absolute() {
            reported.to_path_buf()
        } else {
            self.working_dir().join(reported)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dirs_creates_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().expect("ensure dirs");

        assert!(paths.db_dir().is_dir());
        assert!(paths.videos_dir().is_dir());
        assert!(paths.task_logs_dir().is_dir());
        assert!(paths.config_dir().is_dir());
    }

    #[test]
    fn relative_engine_output_resolves_under_working_dir() {
        let paths = AppPaths::new(PathBuf::from("/base"));
        let resolved = paths.resolve_output(Path::new("videos/clip.mp4"));
        assert_eq!(resolved, PathBuf::from("/base/downloads_temp/videos/clip.mp4"));

        let absolute = paths.resolve_output(Path::new("/elsewhere/clip.mp4"));
        assert_eq!(absolute, PathBuf::from("/elsewhere/clip.mp4"));
    }
}
