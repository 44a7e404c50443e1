use serde::{Deserialize, Serialize};

/// Generate a newtype wrapper around `String` with standard trait impls.
///
/// Each generated type gets: `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`,
/// `Serialize`/`Deserialize` (transparent), `Display`, `Deref<Target=str>`,
/// `AsRef<str>`, `Borrow<str>`, `From<String>`, `From<&str>`.
macro_rules! newtype_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

newtype_string! {
    /// A session name, as supplied by the caller. Use [`validate_session_name`]
    /// before trusting one as a filesystem path component.
    SessionName
}

/// Maximum length of a session name (§3).
pub const SESSION_NAME_MAX_LEN: usize = 64;

/// Error returned when a session name fails the grammar in spec §3/§6.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionNameError {
    #[error("session name must not be empty")]
    Empty,
    #[error("session name is too long (max {SESSION_NAME_MAX_LEN} characters)")]
    TooLong,
    #[error("session name must start with alphanumeric")]
    BadStart,
    #[error("session name may only contain alphanumerics, '.', '-', '_'")]
    BadChar,
}

/// Validate a session name against `^[A-Za-z0-9][A-Za-z0-9._-]*$`, length 1–64.
///
/// Pure, allocation-free grammar check. The daemon calls this on every
/// `create` before touching the store or spawning a PTY.
pub fn validate_session_name(name: &str) -> Result<(), SessionNameError> {
    if name.is_empty() {
        return Err(SessionNameError::Empty);
    }
    if name.len() > SESSION_NAME_MAX_LEN {
        return Err(SessionNameError::TooLong);
    }
    let mut chars = name.chars();
    let first = chars.next().expect("checked non-empty above");
    if !first.is_ascii_alphanumeric() {
        return Err(SessionNameError::BadStart);
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')) {
        return Err(SessionNameError::BadChar);
    }
    Ok(())
}

/// Session lifecycle state (§3). A session is either backed by a live PTY
/// and child process, or it is not — there is no third state on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Running => write!(f, "running"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Summary of a session as returned by `list` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub name: String,
    pub pid: Option<u32>,
    pub command: String,
    pub state: SessionState,
    /// RFC 3339.
    pub created_at: String,
    /// RFC 3339, present only once the session has stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<String>,
}

/// Full session record as returned by `info` (§6): a superset of
/// [`SessionDescriptor`] adding runtime/store details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub pid: Option<u32>,
    pub command: String,
    pub state: SessionState,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<String>,
    /// Buffered byte count in the output store (raw mode) or the VT
    /// screen's version counter (screen-backed mode).
    pub buffered_bytes: u64,
    /// The session's global read position.
    pub position: u64,
    pub cols: u16,
    pub rows: u16,
    pub tui_mode: bool,
    /// Only present when `state == Running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
}

/// One match from a `search` request (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    pub line_number: usize,
    pub line: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_session_name_ok() {
        assert!(validate_session_name("a").is_ok());
        assert!(validate_session_name("my-session.1_x").is_ok());
        assert!(validate_session_name(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_session_name_empty() {
        assert_eq!(validate_session_name(""), Err(SessionNameError::Empty));
    }

    #[test]
    fn test_validate_session_name_too_long() {
        let name = "a".repeat(65);
        assert_eq!(validate_session_name(&name), Err(SessionNameError::TooLong));
    }

    #[test]
    fn test_validate_session_name_bad_start() {
        assert_eq!(
            validate_session_name(".hidden"),
            Err(SessionNameError::BadStart)
        );
        assert_eq!(
            validate_session_name("../etc"),
            Err(SessionNameError::BadStart)
        );
        assert_eq!(
            validate_session_name("-leading"),
            Err(SessionNameError::BadStart)
        );
    }

    #[test]
    fn test_validate_session_name_bad_char() {
        assert_eq!(
            validate_session_name("a/b"),
            Err(SessionNameError::BadChar)
        );
        assert_eq!(
            validate_session_name("a b"),
            Err(SessionNameError::BadChar)
        );
    }

    #[test]
    fn test_session_state_display_and_wire_format() {
        assert_eq!(SessionState::Running.to_string(), "running");
        assert_eq!(SessionState::Stopped.to_string(), "stopped");
        assert_eq!(
            serde_json::to_string(&SessionState::Running).unwrap(),
            r#""running""#
        );
    }

    #[test]
    fn test_session_descriptor_omits_stopped_at_when_none() {
        let d = SessionDescriptor {
            name: "s1".into(),
            pid: Some(123),
            command: "sh".into(),
            state: SessionState::Running,
            created_at: "2026-07-27T00:00:00Z".into(),
            stopped_at: None,
        };
        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("stopped_at"));
    }

    #[test]
    fn test_session_name_newtype() {
        let n = SessionName::new("s1");
        assert_eq!(n.to_string(), "s1");
        let n2: SessionName = "s1".into();
        assert_eq!(n, n2);
    }
}
