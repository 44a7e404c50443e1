use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("home directory not found — set $HOME environment variable")]
    HomeNotFound,
}

/// Centralized path construction for the `~/.shelli/` directory layout.
///
/// Single source of truth for every path under `~/.shelli/`. Use `resolve()` in
/// production code and `from_dir()` in tests.
#[derive(Debug, Clone)]
pub struct ShelliPaths {
    base_dir: PathBuf,
}

impl ShelliPaths {
    /// Resolve paths from the user's home directory (`~/.shelli`).
    pub fn resolve() -> Result<Self, PathError> {
        let home = dirs::home_dir().ok_or(PathError::HomeNotFound)?;
        Ok(Self {
            base_dir: home.join(".shelli"),
        })
    }

    /// Create paths from an explicit base directory. Use in tests.
    pub fn from_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// The base `~/.shelli` directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    // --- Top-level files ---

    pub fn daemon_socket(&self) -> PathBuf {
        self.base_dir.join("daemon.sock")
    }

    pub fn daemon_pid_file(&self) -> PathBuf {
        self.base_dir.join("daemon.pid")
    }

    pub fn user_config(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    // --- File-backend output store layout ---

    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("sessions")
    }

    /// `<name>.out` — the raw captured byte stream for a session.
    pub fn session_output_file(&self, name: &str) -> PathBuf {
        session_output_file_in(&self.data_dir(), name)
    }

    /// `<name>.meta` — JSON-encoded session metadata.
    pub fn session_meta_file(&self, name: &str) -> PathBuf {
        session_meta_file_in(&self.data_dir(), name)
    }
}

/// `<dir>/<name>.out`, for callers whose session-output root isn't the
/// `~/.shelli/sessions` convention (e.g. a daemon configured with an
/// explicit `data_dir`). [`ShelliPaths::session_output_file`] delegates
/// here so both paths stay in sync.
pub fn session_output_file_in(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.out"))
}

/// `<dir>/<name>.meta`, mirroring [`session_output_file_in`].
pub fn session_meta_file_in(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.meta"))
}
