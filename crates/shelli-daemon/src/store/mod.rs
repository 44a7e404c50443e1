//! Output store abstraction (§4.5): an append-only per-session byte log
//! with bounded size, random-offset reads, and persisted metadata.

pub mod file;
pub mod memory;

use serde::{Deserialize, Serialize};

use crate::errors::DaemonError;
use shelli_protocol::SessionState;

/// Persisted per-session record. The store is the sole owner of this
/// data; the session supervisor mutates it only through `update_meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub name: String,
    pub command: String,
    pub pid: Option<u32>,
    pub state: SessionState,
    pub created_at: String,
    pub stopped_at: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub tui_mode: bool,
    pub tui_screen: bool,
    /// Global read cursor. For a screen-backed session this holds the VT
    /// emulator's version counter at the last unnamed read instead of a
    /// byte offset.
    pub position: u64,
    /// Named cursors, keyed by caller-supplied name; same dual byte
    /// offset / version-counter meaning as `position`.
    pub cursors: std::collections::HashMap<String, u64>,
}

impl SessionMeta {
    pub fn new(name: &str, command: &str, cols: u16, rows: u16, tui_mode: bool, tui_screen: bool) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            pid: None,
            state: SessionState::Running,
            created_at: chrono::Utc::now().to_rfc3339(),
            stopped_at: None,
            cols,
            rows,
            tui_mode,
            tui_screen,
            position: 0,
            cursors: std::collections::HashMap::new(),
        }
    }
}

/// Abstract per-session append-only byte log with metadata persistence
/// (§4.5). Implementations: `memory::MemoryStore` (bounded, default),
/// `file::FileStore` (persistent, per-session files).
pub trait OutputStore: Send + Sync {
    fn create(&self, session: &str, meta: SessionMeta) -> Result<(), DaemonError>;
    fn delete(&self, session: &str) -> Result<(), DaemonError>;
    fn exists(&self, session: &str) -> bool;

    /// Append bytes; for bounded backends, drops the oldest bytes on
    /// overflow and clamps every stored cursor position by the same
    /// amount. Fails if the session is unknown to the store.
    fn append(&self, session: &str, bytes: &[u8]) -> Result<(), DaemonError>;
    fn read_from(&self, session: &str, offset: u64) -> Result<Vec<u8>, DaemonError>;
    fn read_all(&self, session: &str) -> Result<Vec<u8>, DaemonError>;
    fn size(&self, session: &str) -> Result<u64, DaemonError>;

    /// Empties the log and resets the global position and all named
    /// cursors to zero.
    fn clear(&self, session: &str) -> Result<(), DaemonError>;

    fn load_meta(&self, session: &str) -> Result<SessionMeta, DaemonError>;
    fn save_meta(&self, session: &str, meta: &SessionMeta) -> Result<(), DaemonError>;

    /// Applies `mutator` to the stored metadata under a write lock,
    /// avoiding read-modify-write races between concurrent requests.
    fn update_meta(
        &self,
        session: &str,
        mutator: &mut dyn FnMut(&mut SessionMeta),
    ) -> Result<(), DaemonError>;

    fn list_sessions(&self) -> Result<Vec<String>, DaemonError>;
}
