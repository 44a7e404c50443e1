use serde::{Deserialize, Serialize};

use crate::types::{SearchMatch, SessionDescriptor, SessionInfo, SessionState};

/// Current wire protocol version. Bump on any incompatible schema change;
/// the daemon rejects a request whose `version` differs from this value.
pub const PROTOCOL_VERSION: u32 = 1;

/// Read mode for the `read` action (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    New,
    All,
}

impl Default for ReadMode {
    fn default() -> Self {
        ReadMode::New
    }
}

/// One request, one response, connection closed. `action` tags the
/// variant on the wire; every other field is optional and only the
/// fields relevant to the chosen action are expected to be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    Create {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        env: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        tui_mode: bool,
        /// Opt-in to the VT-emulator-backed screen instead of the
        /// raw-buffer + frame-detector pipeline. Only meaningful when
        /// `tui_mode` is set.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        tui_screen: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        if_not_exists: bool,
    },
    List,
    Read {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<ReadMode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        head_lines: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tail_lines: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor: Option<String>,
        /// When set, runs the §4.6 `snapshot` operation instead of an
        /// ordinary read: forces a TUI redraw (resize + `SIGWINCH`) and
        /// waits for the output to settle before reading. Valid only for
        /// a running TUI session.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        snapshot: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        settle_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_sec: Option<u64>,
    },
    Send {
        name: String,
        input: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        newline: bool,
    },
    Stop {
        name: String,
    },
    Kill {
        name: String,
    },
    Clear {
        name: String,
    },
    Resize {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
    },
    Info {
        name: String,
    },
    Search {
        name: String,
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<usize>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        ignore_case: bool,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        strip_ansi: bool,
    },
    Size {
        name: String,
    },
    Ping,
}

/// Envelope carrying the protocol version alongside the action ("A
/// protocol version is included in every request").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    #[serde(flatten)]
    pub request: Request,
}

impl Envelope {
    pub fn new(request: Request) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request,
        }
    }
}

/// `{ output, position, state }` for `read`-family actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResult {
    pub output: String,
    pub position: u64,
    pub state: SessionState,
}

/// `{ matches, total_matches }` for `search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    pub total_matches: usize,
}

/// `{ size }` for `size` — a cheap polling primitive (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeResult {
    pub size: u64,
}

/// The response's `data` payload, shaped per action family. Untagged: the
/// client already knows which action it sent and deserializes the shape
/// it expects, so no discriminant rides along on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Read(ReadResult),
    List(Vec<SessionDescriptor>),
    Info(SessionInfo),
    Search(SearchResult),
    Size(SizeResult),
    Created(SessionDescriptor),
    /// `stop`/`kill`/`clear`/`resize`/`send`/`ping` carry no payload
    /// beyond `success`.
    Ack,
}

/// `{ success, error, data }`. Errors are untyped on the wire — only a
/// human-readable message crosses the transport (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl Response {
    pub fn ok(data: ResponseData) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn ok_empty() -> Self {
        Self::ok(ResponseData::Ack)
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip_create() {
        let env = Envelope::new(Request::Create {
            name: "s1".into(),
            command: Some("sh".into()),
            env: None,
            cwd: None,
            cols: Some(80),
            rows: Some(24),
            tui_mode: false,
            tui_screen: false,
            if_not_exists: true,
        });
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""action":"create""#));
        assert!(json.contains(r#""version":1"#));
        let back: Envelope = serde_json::from_str(&json).unwrap();
        match back.request {
            Request::Create {
                name,
                if_not_exists,
                ..
            } => {
                assert_eq!(name, "s1");
                assert!(if_not_exists);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_roundtrip_list_and_ping_have_no_extra_fields() {
        for req in [Request::List, Request::Ping] {
            let env = Envelope::new(req);
            let json = serde_json::to_string(&env).unwrap();
            let back: Envelope = serde_json::from_str(&json).unwrap();
            assert_eq!(back.version, PROTOCOL_VERSION);
        }
    }

    #[test]
    fn test_read_mode_default_is_new() {
        assert_eq!(ReadMode::default(), ReadMode::New);
    }

    #[test]
    fn test_response_err_has_no_data() {
        let resp = Response::err("session not found");
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("session not found"));
        assert!(resp.data.is_none());
    }

    #[test]
    fn test_response_ok_size_roundtrip() {
        let resp = Response::ok(ResponseData::Size(SizeResult { size: 42 }));
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        match back.data {
            Some(ResponseData::Size(SizeResult { size })) => assert_eq!(size, 42),
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn test_request_send_defaults_newline_false() {
        let json = r#"{"version":1,"action":"send","name":"s1","input":"hi"}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        match env.request {
            Request::Send { newline, .. } => assert!(!newline),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_request_search_roundtrip() {
        let env = Envelope::new(Request::Search {
            name: "s1".into(),
            pattern: "error".into(),
            before: Some(1),
            after: Some(2),
            ignore_case: true,
            strip_ansi: true,
        });
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        match back.request {
            Request::Search {
                pattern,
                before,
                after,
                ignore_case,
                ..
            } => {
                assert_eq!(pattern, "error");
                assert_eq!(before, Some(1));
                assert_eq!(after, Some(2));
                assert!(ignore_case);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_request_read_snapshot_fields_roundtrip() {
        let env = Envelope::new(Request::Read {
            name: "s1".into(),
            mode: None,
            head_lines: None,
            tail_lines: None,
            cursor: None,
            snapshot: true,
            settle_ms: Some(300),
            timeout_sec: Some(10),
        });
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""snapshot":true"#));
        let back: Envelope = serde_json::from_str(&json).unwrap();
        match back.request {
            Request::Read {
                snapshot,
                settle_ms,
                timeout_sec,
                ..
            } => {
                assert!(snapshot);
                assert_eq!(settle_ms, Some(300));
                assert_eq!(timeout_sec, Some(10));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
