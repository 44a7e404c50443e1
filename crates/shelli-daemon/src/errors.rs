use std::io;

use shelli_protocol::SessionNameError;

/// All error types for the shelli-daemon crate, grouped per the error
/// kinds in spec §7.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    // --- Validation ---
    #[error("invalid session name: {0}")]
    InvalidSessionName(#[from] SessionNameError),

    #[error("validation error: {0}")]
    Validation(String),

    // --- Not found / conflict ---
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    SessionAlreadyExists(String),

    #[error("session not running: {0}")]
    SessionNotRunning(String),

    #[error("snapshot is only valid for a TUI session: {0}")]
    NotTuiSession(String),

    // --- Child-process / PTY ---
    #[error("PTY error: {0}")]
    PtyError(String),

    // --- I/O ---
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("store error: {0}")]
    Store(String),

    // --- Protocol ---
    #[error("protocol version mismatch: client={client}, daemon={daemon}")]
    VersionMismatch { client: u32, daemon: u32 },

    #[error("protocol error: {0}")]
    Protocol(#[from] shelli_protocol::ProtocolError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // --- Daemon lifecycle ---
    #[error("daemon not running")]
    NotRunning,

    #[error("daemon already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("shutdown timeout exceeded")]
    ShutdownTimeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    // --- Internal ---
    #[error("internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    /// Machine-readable classification, kept for logging and tests. Not
    /// carried on the wire — spec §7 leaves errors untyped there.
    pub fn error_code(&self) -> &'static str {
        match self {
            DaemonError::InvalidSessionName(_) => "invalid_session_name",
            DaemonError::Validation(_) => "validation_error",
            DaemonError::SessionNotFound(_) => "session_not_found",
            DaemonError::SessionAlreadyExists(_) => "session_already_exists",
            DaemonError::SessionNotRunning(_) => "session_not_running",
            DaemonError::NotTuiSession(_) => "not_tui_session",
            DaemonError::PtyError(_) => "pty_error",
            DaemonError::Io(_) => "io_error",
            DaemonError::Store(_) => "store_error",
            DaemonError::VersionMismatch { .. } => "version_mismatch",
            DaemonError::Protocol(_) => "protocol_error",
            DaemonError::Serde(_) => "serialization_error",
            DaemonError::NotRunning => "daemon_not_running",
            DaemonError::AlreadyRunning(_) => "daemon_already_running",
            DaemonError::ShutdownTimeout => "shutdown_timeout",
            DaemonError::ConnectionFailed(_) => "connection_failed",
            DaemonError::Internal(_) => "internal_error",
        }
    }

    /// Whether this error originates from caller input rather than daemon
    /// or environment state — used to pick a log level (`warn` vs.
    /// `error`) the way the teacher's dispatcher does.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DaemonError::InvalidSessionName(_)
                | DaemonError::Validation(_)
                | DaemonError::SessionNotFound(_)
                | DaemonError::SessionAlreadyExists(_)
                | DaemonError::SessionNotRunning(_)
                | DaemonError::NotTuiSession(_)
                | DaemonError::VersionMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaemonError::SessionNotFound("s1".to_string());
        assert_eq!(err.to_string(), "session not found: s1");
        assert_eq!(err.error_code(), "session_not_found");
        assert!(err.is_user_error());
    }

    #[test]
    fn test_user_error_classification() {
        assert!(DaemonError::SessionNotFound("x".into()).is_user_error());
        assert!(DaemonError::SessionAlreadyExists("x".into()).is_user_error());
        assert!(DaemonError::SessionNotRunning("x".into()).is_user_error());
        assert!(DaemonError::Validation("bad".into()).is_user_error());
        assert!(DaemonError::VersionMismatch { client: 2, daemon: 1 }.is_user_error());

        assert!(!DaemonError::NotRunning.is_user_error());
        assert!(!DaemonError::PtyError("x".into()).is_user_error());
        assert!(!DaemonError::Internal("x".into()).is_user_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let daemon_err: DaemonError = io_err.into();
        assert_eq!(daemon_err.error_code(), "io_error");
        assert!(!daemon_err.is_user_error());
    }

    #[test]
    fn test_session_name_error_conversion() {
        let err = shelli_protocol::validate_session_name("").unwrap_err();
        let daemon_err: DaemonError = err.into();
        assert_eq!(daemon_err.error_code(), "invalid_session_name");
        assert!(daemon_err.is_user_error());
    }
}
