use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use nix::fcntl::{Flock, FlockArg};
use shelli_paths::{session_meta_file_in, session_output_file_in};

use crate::errors::DaemonError;

use super::{OutputStore, SessionMeta};

const META_SUFFIX: &str = ".meta";

/// Persistent per-session output store (§4.5 file backend). A flat
/// `<name>.out` / `<name>.meta` pair lives directly under `data_dir`, per
/// the same naming `shelli-paths`'s `session_output_file`/
/// `session_meta_file` use; a `<name>.lock` file next to them guards
/// exclusive append, following the teacher's `flock`-per-resource
/// convention.
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn output_path(&self, session: &str) -> PathBuf {
        session_output_file_in(&self.data_dir, session)
    }

    fn meta_path(&self, session: &str) -> PathBuf {
        session_meta_file_in(&self.data_dir, session)
    }

    fn lock_path(&self, session: &str) -> PathBuf {
        self.data_dir.join(format!("{session}.lock"))
    }

    fn acquire_lock(&self, session: &str) -> Result<Flock<File>, DaemonError> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path(session))
            .map_err(DaemonError::Io)?;
        Flock::lock(lock_file, FlockArg::LockExclusive)
            .map_err(|(_, e)| DaemonError::Store(format!("failed to lock session {session}: {e}")))
    }

    fn read_meta_unlocked(&self, session: &str) -> Result<SessionMeta, DaemonError> {
        let path = self.meta_path(session);
        let content = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DaemonError::SessionNotFound(session.to_string())
            } else {
                DaemonError::Io(e)
            }
        })?;
        serde_json::from_str(&content).map_err(DaemonError::from)
    }

    fn write_meta_unlocked(&self, session: &str, meta: &SessionMeta) -> Result<(), DaemonError> {
        let json = serde_json::to_string_pretty(meta)?;
        fs::write(self.meta_path(session), json).map_err(DaemonError::Io)
    }
}

impl OutputStore for FileStore {
    fn create(&self, session: &str, meta: SessionMeta) -> Result<(), DaemonError> {
        fs::create_dir_all(&self.data_dir).map_err(DaemonError::Io)?;
        File::create(self.output_path(session)).map_err(DaemonError::Io)?;
        self.write_meta_unlocked(session, &meta)
    }

    fn delete(&self, session: &str) -> Result<(), DaemonError> {
        for path in [self.output_path(session), self.meta_path(session), self.lock_path(session)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(DaemonError::Io(e)),
            }
        }
        Ok(())
    }

    fn exists(&self, session: &str) -> bool {
        self.meta_path(session).exists()
    }

    fn append(&self, session: &str, bytes: &[u8]) -> Result<(), DaemonError> {
        if !self.exists(session) {
            return Err(DaemonError::SessionNotFound(session.to_string()));
        }
        let _lock = self.acquire_lock(session)?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.output_path(session))
            .map_err(DaemonError::Io)?;
        file.write_all(bytes).map_err(DaemonError::Io)
    }

    fn read_from(&self, session: &str, offset: u64) -> Result<Vec<u8>, DaemonError> {
        if !self.exists(session) {
            return Err(DaemonError::SessionNotFound(session.to_string()));
        }
        let mut file = File::open(self.output_path(session)).map_err(DaemonError::Io)?;
        let len = file.metadata().map_err(DaemonError::Io)?.len();
        if offset >= len {
            return Ok(Vec::new());
        }
        file.seek(SeekFrom::Start(offset)).map_err(DaemonError::Io)?;
        let mut buf = Vec::with_capacity((len - offset) as usize);
        file.read_to_end(&mut buf).map_err(DaemonError::Io)?;
        Ok(buf)
    }

    fn read_all(&self, session: &str) -> Result<Vec<u8>, DaemonError> {
        self.read_from(session, 0)
    }

    fn size(&self, session: &str) -> Result<u64, DaemonError> {
        if !self.exists(session) {
            return Err(DaemonError::SessionNotFound(session.to_string()));
        }
        fs::metadata(self.output_path(session))
            .map(|m| m.len())
            .map_err(DaemonError::Io)
    }

    fn clear(&self, session: &str) -> Result<(), DaemonError> {
        let _lock = self.acquire_lock(session)?;
        File::create(self.output_path(session)).map_err(DaemonError::Io)?;
        let mut meta = self.read_meta_unlocked(session)?;
        meta.position = 0;
        for cursor in meta.cursors.values_mut() {
            *cursor = 0;
        }
        self.write_meta_unlocked(session, &meta)
    }

    fn load_meta(&self, session: &str) -> Result<SessionMeta, DaemonError> {
        self.read_meta_unlocked(session)
    }

    fn save_meta(&self, session: &str, meta: &SessionMeta) -> Result<(), DaemonError> {
        let _lock = self.acquire_lock(session)?;
        self.write_meta_unlocked(session, meta)
    }

    fn update_meta(
        &self,
        session: &str,
        mutator: &mut dyn FnMut(&mut SessionMeta),
    ) -> Result<(), DaemonError> {
        let _lock = self.acquire_lock(session)?;
        let mut meta = self.read_meta_unlocked(session)?;
        mutator(&mut meta);
        self.write_meta_unlocked(session, &meta)
    }

    fn list_sessions(&self) -> Result<Vec<String>, DaemonError> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.data_dir).map_err(DaemonError::Io)? {
            let entry = entry.map_err(DaemonError::Io)?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(file_name) = entry.file_name().to_str() {
                if let Some(name) = file_name.strip_suffix(META_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> SessionMeta {
        SessionMeta::new(name, "bash", 80, 24, false, false)
    }

    #[test]
    fn test_create_append_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.create("s1", meta("s1")).unwrap();
        store.append("s1", b"hello ").unwrap();
        store.append("s1", b"world").unwrap();
        assert_eq!(store.read_all("s1").unwrap(), b"hello world");
        assert_eq!(store.size("s1").unwrap(), 11);
    }

    #[test]
    fn test_read_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.create("s1", meta("s1")).unwrap();
        store.append("s1", b"0123456789").unwrap();
        assert_eq!(store.read_from("s1", 5).unwrap(), b"56789");
        assert_eq!(store.read_from("s1", 100).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_clear_truncates_and_resets_meta() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.create("s1", meta("s1")).unwrap();
        store.append("s1", b"data").unwrap();
        store
            .update_meta("s1", &mut |m| m.position = 4)
            .unwrap();
        store.clear("s1").unwrap();
        assert_eq!(store.size("s1").unwrap(), 0);
        assert_eq!(store.load_meta("s1").unwrap().position, 0);
    }

    #[test]
    fn test_update_meta_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.create("s1", meta("s1")).unwrap();
        store
            .update_meta("s1", &mut |m| m.cursors.insert("c1".to_string(), 7))
            .unwrap();
        let loaded = store.load_meta("s1").unwrap();
        assert_eq!(*loaded.cursors.get("c1").unwrap(), 7);
    }

    #[test]
    fn test_delete_removes_session_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.create("s1", meta("s1")).unwrap();
        store.delete("s1").unwrap();
        assert!(!store.exists("s1"));
        assert!(!dir.path().join("s1.out").exists());
        assert!(!dir.path().join("s1.meta").exists());
    }

    #[test]
    fn test_create_lays_out_flat_name_out_and_meta_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.create("s1", meta("s1")).unwrap();
        assert!(dir.path().join("s1.out").is_file());
        assert!(dir.path().join("s1.meta").is_file());
        assert!(!dir.path().join("s1").exists());
    }

    #[test]
    fn test_list_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.create("s1", meta("s1")).unwrap();
        store.create("s2", meta("s2")).unwrap();
        let mut names = store.list_sessions().unwrap();
        names.sort();
        assert_eq!(names, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn test_append_unknown_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        assert!(store.append("missing", b"x").is_err());
    }
}
