use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::DaemonError;

use super::{OutputStore, SessionMeta};

struct Entry {
    bytes: Vec<u8>,
    meta: SessionMeta,
}

/// Bounded in-memory output store (§4.5 memory backend, default). One
/// read-write lock guards the whole map; per-session contention is
/// expected to be low (one capture task + occasional reads per session).
pub struct MemoryStore {
    cap_bytes: usize,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            cap_bytes,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl OutputStore for MemoryStore {
    fn create(&self, session: &str, meta: SessionMeta) -> Result<(), DaemonError> {
        let mut entries = self.entries.write().expect("memory store lock poisoned");
        entries.insert(
            session.to_string(),
            Entry {
                bytes: Vec::new(),
                meta,
            },
        );
        Ok(())
    }

    fn delete(&self, session: &str) -> Result<(), DaemonError> {
        self.entries.write().expect("memory store lock poisoned").remove(session);
        Ok(())
    }

    fn exists(&self, session: &str) -> bool {
        self.entries.read().expect("memory store lock poisoned").contains_key(session)
    }

    fn append(&self, session: &str, bytes: &[u8]) -> Result<(), DaemonError> {
        let mut entries = self.entries.write().expect("memory store lock poisoned");
        let entry = entries
            .get_mut(session)
            .ok_or_else(|| DaemonError::SessionNotFound(session.to_string()))?;
        entry.bytes.extend_from_slice(bytes);
        if entry.bytes.len() > self.cap_bytes {
            let drop_count = entry.bytes.len() - self.cap_bytes;
            entry.bytes.drain(0..drop_count);
            entry.meta.position = entry.meta.position.saturating_sub(drop_count as u64);
            for cursor in entry.meta.cursors.values_mut() {
                *cursor = cursor.saturating_sub(drop_count as u64);
            }
        }
        Ok(())
    }

    fn read_from(&self, session: &str, offset: u64) -> Result<Vec<u8>, DaemonError> {
        let entries = self.entries.read().expect("memory store lock poisoned");
        let entry = entries
            .get(session)
            .ok_or_else(|| DaemonError::SessionNotFound(session.to_string()))?;
        let offset = offset as usize;
        if offset >= entry.bytes.len() {
            return Ok(Vec::new());
        }
        Ok(entry.bytes[offset..].to_vec())
    }

    fn read_all(&self, session: &str) -> Result<Vec<u8>, DaemonError> {
        self.read_from(session, 0)
    }

    fn size(&self, session: &str) -> Result<u64, DaemonError> {
        let entries = self.entries.read().expect("memory store lock poisoned");
        let entry = entries
            .get(session)
            .ok_or_else(|| DaemonError::SessionNotFound(session.to_string()))?;
        Ok(entry.bytes.len() as u64)
    }

    fn clear(&self, session: &str) -> Result<(), DaemonError> {
        let mut entries = self.entries.write().expect("memory store lock poisoned");
        let entry = entries
            .get_mut(session)
            .ok_or_else(|| DaemonError::SessionNotFound(session.to_string()))?;
        entry.bytes.clear();
        entry.meta.position = 0;
        for cursor in entry.meta.cursors.values_mut() {
            *cursor = 0;
        }
        Ok(())
    }

    fn load_meta(&self, session: &str) -> Result<SessionMeta, DaemonError> {
        let entries = self.entries.read().expect("memory store lock poisoned");
        entries
            .get(session)
            .map(|e| e.meta.clone())
            .ok_or_else(|| DaemonError::SessionNotFound(session.to_string()))
    }

    fn save_meta(&self, session: &str, meta: &SessionMeta) -> Result<(), DaemonError> {
        let mut entries = self.entries.write().expect("memory store lock poisoned");
        let entry = entries
            .get_mut(session)
            .ok_or_else(|| DaemonError::SessionNotFound(session.to_string()))?;
        entry.meta = meta.clone();
        Ok(())
    }

    fn update_meta(
        &self,
        session: &str,
        mutator: &mut dyn FnMut(&mut SessionMeta),
    ) -> Result<(), DaemonError> {
        let mut entries = self.entries.write().expect("memory store lock poisoned");
        let entry = entries
            .get_mut(session)
            .ok_or_else(|| DaemonError::SessionNotFound(session.to_string()))?;
        mutator(&mut entry.meta);
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<String>, DaemonError> {
        Ok(self
            .entries
            .read()
            .expect("memory store lock poisoned")
            .keys()
            .cloned()
            .collect())
    }
}
