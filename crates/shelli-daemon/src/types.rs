use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use shelli_paths::ShelliPaths;

/// Output store backend selection (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Memory
    }
}

/// Daemon-specific configuration, read from the `[daemon]` section of
/// `~/.shelli/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path to the Unix domain socket. Default: `~/.shelli/daemon.sock`.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Path to the PID file. Default: `~/.shelli/daemon.pid`.
    #[serde(default = "default_pid_path")]
    pub pid_path: PathBuf,

    /// Output store backend (§4.5).
    #[serde(default)]
    pub backend: StoreBackend,

    /// File-backend data directory root. Default: `~/.shelli/sessions`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Memory-backend per-session cap in bytes (§4.5). Default: 10 MiB.
    #[serde(default = "default_memory_cap_bytes")]
    pub memory_cap_bytes: usize,

    /// TTL cleaner threshold (§4.8). `None` disables the cleaner.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// Delay between `SIGTERM` and `SIGKILL` on `stop`/`kill` (§4.6).
    /// Default: 100 ms.
    #[serde(default = "default_kill_grace_period_ms")]
    pub kill_grace_period_ms: u64,

    /// PTY read deadline for the capture task (§4.6, §5). Default: 100 ms.
    #[serde(default = "default_pty_read_deadline_ms")]
    pub pty_read_deadline_ms: u64,

    /// Per-connection transport deadline (§5). Default: 30 s.
    #[serde(default = "default_client_deadline_secs")]
    pub client_deadline_secs: u64,

    /// Frame detector size-cap rescue threshold (§4.2). Default: 10 MiB.
    #[serde(default = "default_frame_detector_max_size_bytes")]
    pub frame_detector_max_size_bytes: usize,
}

impl DaemonConfig {
    /// Validate configuration values. Called after loading to catch
    /// misconfiguration early.
    pub fn validate(&self) -> Result<(), crate::errors::DaemonError> {
        if self.memory_cap_bytes == 0 {
            return Err(crate::errors::DaemonError::Validation(
                "memory_cap_bytes must be > 0".to_string(),
            ));
        }
        if self.frame_detector_max_size_bytes == 0 {
            return Err(crate::errors::DaemonError::Validation(
                "frame_detector_max_size_bytes must be > 0".to_string(),
            ));
        }
        if self.client_deadline_secs == 0 {
            return Err(crate::errors::DaemonError::Validation(
                "client_deadline_secs must be > 0".to_string(),
            ));
        }
        if let Some(ttl) = self.ttl_secs {
            if ttl == 0 {
                return Err(crate::errors::DaemonError::Validation(
                    "ttl_secs must be > 0 when set; omit it to disable the TTL cleaner"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            pid_path: default_pid_path(),
            backend: StoreBackend::default(),
            data_dir: default_data_dir(),
            memory_cap_bytes: default_memory_cap_bytes(),
            ttl_secs: None,
            kill_grace_period_ms: default_kill_grace_period_ms(),
            pty_read_deadline_ms: default_pty_read_deadline_ms(),
            client_deadline_secs: default_client_deadline_secs(),
            frame_detector_max_size_bytes: default_frame_detector_max_size_bytes(),
        }
    }
}

fn resolve_paths_or_tmp_fallback() -> ShelliPaths {
    ShelliPaths::resolve().unwrap_or_else(|e| {
        tracing::warn!(
            event = "daemon.config.home_dir_fallback",
            error = %e,
            fallback = "/tmp/.shelli",
        );
        ShelliPaths::from_dir(PathBuf::from("/tmp/.shelli"))
    })
}

fn default_socket_path() -> PathBuf {
    resolve_paths_or_tmp_fallback().daemon_socket()
}

fn default_pid_path() -> PathBuf {
    resolve_paths_or_tmp_fallback().daemon_pid_file()
}

fn default_data_dir() -> PathBuf {
    resolve_paths_or_tmp_fallback().data_dir()
}

fn default_memory_cap_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_kill_grace_period_ms() -> u64 {
    100
}

fn default_pty_read_deadline_ms() -> u64 {
    100
}

fn default_client_deadline_secs() -> u64 {
    30
}

fn default_frame_detector_max_size_bytes() -> usize {
    10 * 1024 * 1024
}

/// Wrapper for deserializing the `[daemon]` section from a shelli config
/// file. Mirrors just enough of the file structure to extract that one
/// section.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    daemon: DaemonConfig,
}

/// Load daemon configuration from `~/.shelli/config.toml`. Falls back to
/// defaults if the file doesn't exist or the section is missing.
pub fn load_daemon_config() -> Result<DaemonConfig, crate::errors::DaemonError> {
    let config_path = resolve_paths_or_tmp_fallback().user_config();

    let config = match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
            Ok(file) => file.daemon,
            Err(e) => {
                tracing::warn!(
                    event = "daemon.config.parse_failed",
                    path = %config_path.display(),
                    error = %e,
                );
                DaemonConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DaemonConfig::default(),
        Err(e) => {
            tracing::warn!(
                event = "daemon.config.read_failed",
                path = %config_path.display(),
                error = %e,
            );
            DaemonConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_config_defaults() {
        let config = DaemonConfig::default();
        assert!(config.socket_path.ends_with("daemon.sock"));
        assert_eq!(config.memory_cap_bytes, 10 * 1024 * 1024);
        assert_eq!(config.kill_grace_period_ms, 100);
        assert_eq!(config.pty_read_deadline_ms, 100);
        assert_eq!(config.client_deadline_secs, 30);
        assert!(config.ttl_secs.is_none());
        assert_eq!(config.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_daemon_config_serde_roundtrip() {
        let config = DaemonConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DaemonConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.memory_cap_bytes, config.memory_cap_bytes);
        assert_eq!(parsed.client_deadline_secs, config.client_deadline_secs);
    }

    #[test]
    fn test_load_daemon_config_from_toml() {
        let toml = r#"
[daemon]
memory_cap_bytes = 1024
ttl_secs = 600
backend = "file"
"#;
        let file: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(file.daemon.memory_cap_bytes, 1024);
        assert_eq!(file.daemon.ttl_secs, Some(600));
        assert_eq!(file.daemon.backend, StoreBackend::File);
        // Defaults for unset fields.
        assert_eq!(file.daemon.kill_grace_period_ms, 100);
    }

    #[test]
    fn test_load_daemon_config_missing_section() {
        let toml = r#"
[other]
foo = "bar"
"#;
        let file: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(file.daemon.memory_cap_bytes, 10 * 1024 * 1024);
        assert!(file.daemon.ttl_secs.is_none());
    }

    #[test]
    fn test_validate_defaults_ok() {
        assert!(DaemonConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_memory_cap_fails() {
        let mut config = DaemonConfig::default();
        config.memory_cap_bytes = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("memory_cap_bytes"));
    }

    #[test]
    fn test_validate_zero_ttl_fails() {
        let mut config = DaemonConfig::default();
        config.ttl_secs = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ttl_secs"));
    }

    #[test]
    fn test_validate_positive_ttl_ok() {
        let mut config = DaemonConfig::default();
        config.ttl_secs = Some(3600);
        assert!(config.validate().is_ok());
    }
}
