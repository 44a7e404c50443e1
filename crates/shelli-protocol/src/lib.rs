pub mod codec;
mod messages;
mod types;

pub use messages::{
    Envelope, ReadMode, ReadResult, Request, Response, ResponseData, SearchResult, SizeResult,
    PROTOCOL_VERSION,
};
pub use types::{
    validate_session_name, SearchMatch, SessionDescriptor, SessionInfo, SessionName,
    SessionNameError, SessionState, SESSION_NAME_MAX_LEN,
};

/// Errors in the wire layer itself — malformed frames, I/O on the
/// transport. Distinct from [`Response::err`], which carries an
/// application-level failure that still round-trips as a well-formed
/// message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("protocol error: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
