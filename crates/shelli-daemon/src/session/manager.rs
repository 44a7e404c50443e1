//! Session supervisor (§4.6): orchestrates session lifecycle, owning the
//! PTY map and the in-memory half of each session's state. The output
//! store is the durable half and is never touched without going through
//! its own API.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shelli_protocol::{
    ReadMode, ReadResult, SearchMatch, SearchResult, SessionDescriptor, SessionInfo, SessionState,
};

use crate::errors::DaemonError;
use crate::pty::manager::PtyManager;
use crate::session::state::{LiveSession, TuiPipeline};
use crate::store::{OutputStore, SessionMeta};
use crate::types::DaemonConfig;
use crate::vt_screen::VtScreen;

type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

struct Inner {
    pty: PtyManager,
    live: HashMap<String, LiveSession>,
}

/// Owns all per-session state not owned by the store: the PTY master, the
/// child process handle, the capture task's cancellation signal, and the
/// TUI pipeline. Shared via `Arc`; every public operation takes `&self`
/// and guards its own brief critical sections with `inner`, per the
/// single-global-lock discipline in §5.
pub struct SessionManager {
    store: Arc<dyn OutputStore>,
    config: DaemonConfig,
    inner: Mutex<Inner>,
}

impl SessionManager {
    pub fn new(config: DaemonConfig, store: Arc<dyn OutputStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            inner: Mutex::new(Inner {
                pty: PtyManager::new(),
                live: HashMap::new(),
            }),
        })
    }

    /// Mark every persisted `running` session as `stopped` on daemon
    /// startup (§9/§11): their processes died with the previous daemon
    /// instance, but the file backend may still list them as running.
    pub fn recover_orphaned_sessions(&self) {
        let Ok(names) = self.store.list_sessions() else {
            return;
        };
        for name in names {
            let Ok(meta) = self.store.load_meta(&name) else {
                continue;
            };
            if meta.state != SessionState::Running {
                continue;
            }
            let stopped_at = chrono::Utc::now().to_rfc3339();
            match self.store.update_meta(&name, &mut |m| {
                m.state = SessionState::Stopped;
                m.stopped_at = Some(stopped_at.clone());
            }) {
                Ok(()) => info!(event = "daemon.session.recovered_as_stopped", session = %name),
                Err(e) => warn!(
                    event = "daemon.session.recovery_mark_failed",
                    session = %name,
                    error = %e,
                ),
            }
        }
    }

    // ---------------------------------------------------------------
    // create
    // ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        self: &Arc<Self>,
        name: &str,
        command: Option<&str>,
        env: &[(String, String)],
        cwd: Option<&Path>,
        cols: Option<u16>,
        rows: Option<u16>,
        tui_mode: bool,
        tui_screen: bool,
        if_not_exists: bool,
    ) -> Result<SessionInfo, DaemonError> {
        shelli_protocol::validate_session_name(name)?;
        let cols = cols.filter(|&c| c > 0).unwrap_or(80);
        let rows = rows.filter(|&r| r > 0).unwrap_or(24);
        let command = command.unwrap_or("").to_string();
        let tui_screen = tui_mode && tui_screen;

        {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            if inner.live.contains_key(name) {
                let running = inner.pty.get(name).is_some();
                if running && if_not_exists {
                    drop(inner);
                    return self.info(name).await;
                }
                return Err(DaemonError::SessionAlreadyExists(name.to_string()));
            }
        }

        if self.store.exists(name) {
            return Err(DaemonError::SessionAlreadyExists(name.to_string()));
        }

        info!(
            event = "daemon.session.create_started",
            session = name,
            command = %command,
            tui_mode = tui_mode,
        );

        let meta = SessionMeta::new(name, &command, cols, rows, tui_mode, tui_screen);
        self.store.create(name, meta)?;

        let prepared = {
            let mut inner = self.inner.lock().expect("session manager lock poisoned");
            let result = inner
                .pty
                .create(name, &command, env, cwd, cols, rows)
                .and_then(|pty| {
                    let pid = pty.child_process_id();
                    let reader = pty.try_clone_reader()?;
                    let writer = pty.writer_handle();
                    Ok((pid, reader, writer))
                });
            if result.is_err() {
                if let Some(pty) = inner.pty.remove(name) {
                    pty.signal_kill();
                }
            }
            result
        };
        let (pid, reader, writer) = match prepared {
            Ok(v) => v,
            Err(e) => {
                let _ = self.store.delete(name);
                return Err(e);
            }
        };

        let screen = if tui_screen {
            Some(VtScreen::new(cols, rows))
        } else {
            None
        };
        let cancel = CancellationToken::new();
        let live = match &screen {
            Some(screen) => LiveSession::screen_tui(cancel.clone(), Arc::clone(screen)),
            None if tui_mode => {
                LiveSession::raw_tui(cancel.clone(), self.config.frame_detector_max_size_bytes)
            }
            None => LiveSession::plain(cancel.clone()),
        };
        if let Some(screen) = &screen {
            screen.spawn_response_bridge(writer.clone());
        }
        {
            let mut inner = self.inner.lock().expect("session manager lock poisoned");
            inner.live.insert(name.to_string(), live);
        }

        self.store.update_meta(name, &mut |m| m.pid = pid)?;

        self.spawn_capture_task(name.to_string(), reader, writer, cancel);

        info!(event = "daemon.session.create_completed", session = name, pid = ?pid);

        self.info(name).await
    }

    // ---------------------------------------------------------------
    // capture task
    // ---------------------------------------------------------------

    fn spawn_capture_task(
        self: &Arc<Self>,
        name: String,
        mut reader: Box<dyn Read + Send>,
        writer: Writer,
        cancel: CancellationToken,
    ) {
        let manager = Arc::clone(self);
        let read_deadline = Duration::from_millis(manager.config.pty_read_deadline_ms);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();

        std::thread::Builder::new()
            .name(format!("shelli-pty-reader-{name}"))
            .spawn(move || {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            })
            .expect("failed to spawn PTY reader thread");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = tokio::time::timeout(read_deadline, rx.recv()) => {
                        match result {
                            Ok(Some(chunk)) => manager.handle_capture_chunk(&name, &chunk, &writer).await,
                            Ok(None) => break,
                            Err(_) => continue,
                        }
                    }
                }
            }
            manager.finish_capture(&name).await;
        });
    }

    async fn handle_capture_chunk(&self, name: &str, chunk: &[u8], writer: &Writer) {
        enum Action {
            AppendRaw,
            Screen(Arc<VtScreen>),
            RawTui { truncate: bool, data_after: Vec<u8> },
        }

        let action = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            match inner.live.get(name).map(|l| &l.pipeline) {
                Some(None) | None => Action::AppendRaw,
                Some(Some(TuiPipeline::Screen(screen))) => Action::Screen(Arc::clone(screen)),
                Some(Some(TuiPipeline::Raw { detector, responder })) => {
                    let after_responder = responder
                        .lock()
                        .expect("responder lock poisoned")
                        .process(chunk, writer);
                    let result = detector
                        .lock()
                        .expect("frame detector lock poisoned")
                        .process(&after_responder);
                    Action::RawTui {
                        truncate: result.truncate,
                        data_after: result.data_after,
                    }
                }
            }
        };

        match action {
            Action::AppendRaw => {
                if let Err(e) = self.store.append(name, chunk) {
                    debug!(event = "daemon.session.append_failed", session = name, error = %e);
                }
            }
            Action::Screen(screen) => {
                screen.write(chunk);
                if let Err(e) = self.store.append(name, chunk) {
                    debug!(event = "daemon.session.append_failed", session = name, error = %e);
                }
            }
            Action::RawTui { truncate, data_after } => {
                if truncate {
                    let _ = self.store.clear(name);
                }
                if !data_after.is_empty() {
                    if let Err(e) = self.store.append(name, &data_after) {
                        debug!(event = "daemon.session.append_failed", session = name, error = %e);
                    }
                }
            }
        }
    }

    /// Capture task step 5: flush any pending frame-detector bytes, wait
    /// for the child, close the PTY, and transition to *stopped*.
    async fn finish_capture(&self, name: &str) {
        let flushed = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            match inner.live.get(name).map(|l| &l.pipeline) {
                Some(Some(TuiPipeline::Raw { detector, .. })) => {
                    Some(detector.lock().expect("frame detector lock poisoned").flush())
                }
                _ => None,
            }
        };
        if let Some(bytes) = flushed {
            if !bytes.is_empty() {
                let _ = self.store.append(name, &bytes);
            }
        }

        let screen = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            inner.live.get(name).and_then(|l| l.screen().cloned())
        };
        if let Some(screen) = screen {
            screen.close().await;
        }

        let pty = {
            let mut inner = self.inner.lock().expect("session manager lock poisoned");
            inner.pty.remove(name)
        };
        if let Some(mut pty) = pty {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = pty.wait();
            })
            .await;
        }

        let stopped_at = chrono::Utc::now().to_rfc3339();
        if let Err(e) = self.store.update_meta(name, &mut |m| {
            m.state = SessionState::Stopped;
            m.stopped_at = Some(stopped_at.clone());
        }) {
            warn!(event = "daemon.session.stop_persist_failed", session = name, error = %e);
        }
        info!(event = "daemon.session.capture_task_exited", session = name);
    }

    // ---------------------------------------------------------------
    // send
    // ---------------------------------------------------------------

    pub async fn send(&self, name: &str, input: &str, append_newline: bool) -> Result<(), DaemonError> {
        let writer = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            if !inner.live.contains_key(name) {
                return Err(DaemonError::SessionNotFound(name.to_string()));
            }
            let pty = inner
                .pty
                .get(name)
                .ok_or_else(|| DaemonError::SessionNotRunning(name.to_string()))?;
            pty.writer_handle()
        };

        let mut data = input.as_bytes().to_vec();
        if append_newline {
            data.push(b'\n');
        }

        tokio::task::spawn_blocking(move || {
            let mut w = writer
                .lock()
                .map_err(|_| DaemonError::PtyError("writer lock poisoned".to_string()))?;
            w.write_all(&data)
                .map_err(|e| DaemonError::PtyError(format!("write stdin: {e}")))?;
            w.flush()
                .map_err(|e| DaemonError::PtyError(format!("flush stdin: {e}")))
        })
        .await
        .map_err(|e| DaemonError::Internal(format!("send task panicked: {e}")))?
    }

    // ---------------------------------------------------------------
    // read / snapshot
    // ---------------------------------------------------------------

    pub async fn read(
        &self,
        name: &str,
        mode: ReadMode,
        head_lines: Option<usize>,
        tail_lines: Option<usize>,
        cursor_name: Option<&str>,
    ) -> Result<ReadResult, DaemonError> {
        if head_lines.is_some() && tail_lines.is_some() {
            return Err(DaemonError::Validation(
                "head_lines and tail_lines are mutually exclusive".to_string(),
            ));
        }
        if !self.store.exists(name) {
            return Err(DaemonError::SessionNotFound(name.to_string()));
        }

        let screen = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            inner.live.get(name).and_then(|l| l.screen().cloned())
        };

        let (mut output, position) = match (&screen, mode) {
            (Some(screen), ReadMode::All) => (screen.string(), screen.version()),
            (Some(screen), ReadMode::New) => {
                let version = screen.version();
                let meta = self.store.load_meta(name)?;
                let last = match cursor_name {
                    Some(c) => meta.cursors.get(c).copied().unwrap_or(0),
                    None => meta.position,
                };
                let out = if version > last { screen.string() } else { String::new() };
                self.store.update_meta(name, &mut |m| match cursor_name {
                    Some(c) => {
                        m.cursors.insert(c.to_string(), version);
                    }
                    None => m.position = version,
                })?;
                (out, version)
            }
            (None, ReadMode::All) => {
                let bytes = self.store.read_all(name)?;
                let size = self.store.size(name)?;
                (String::from_utf8_lossy(&bytes).into_owned(), size)
            }
            (None, ReadMode::New) => {
                let meta = self.store.load_meta(name)?;
                let from = match cursor_name {
                    Some(c) => meta.cursors.get(c).copied().unwrap_or(0),
                    None => meta.position,
                };
                let size = self.store.size(name)?;
                let bytes = self.store.read_from(name, from)?;
                self.store.update_meta(name, &mut |m| match cursor_name {
                    Some(c) => {
                        m.cursors.insert(c.to_string(), size);
                    }
                    None => m.position = size,
                })?;
                (String::from_utf8_lossy(&bytes).into_owned(), size)
            }
        };

        if let Some(n) = head_lines {
            output = take_lines(&output, n, true);
        } else if let Some(n) = tail_lines {
            output = take_lines(&output, n, false);
        }

        let state = self.store.load_meta(name)?.state;
        Ok(ReadResult { output, position, state })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn snapshot(
        &self,
        name: &str,
        settle_ms: Option<u64>,
        timeout_sec: Option<u64>,
        head_lines: Option<usize>,
        tail_lines: Option<usize>,
    ) -> Result<ReadResult, DaemonError> {
        let meta = self.store.load_meta(name)?;
        if !meta.tui_mode {
            return Err(DaemonError::NotTuiSession(name.to_string()));
        }
        if meta.state != SessionState::Running {
            return Err(DaemonError::SessionNotRunning(name.to_string()));
        }
        let (cols, rows) = (meta.cols, meta.rows);
        let settle = Duration::from_millis(settle_ms.unwrap_or(300));
        let timeout = Duration::from_secs(timeout_sec.unwrap_or(10));
        let deadline = Instant::now() + timeout;

        let screen = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            inner.live.get(name).and_then(|l| l.screen().cloned())
        };

        self.set_snapshot_mode(name, &screen, true);
        let result = self.run_snapshot_cycle(name, &screen, cols, rows, settle, deadline).await;
        self.set_snapshot_mode(name, &screen, false);

        let mut result = result?;
        if let Some(n) = head_lines {
            result.output = take_lines(&result.output, n, true);
        } else if let Some(n) = tail_lines {
            result.output = take_lines(&result.output, n, false);
        }
        Ok(result)
    }

    fn set_snapshot_mode(&self, name: &str, screen: &Option<Arc<VtScreen>>, enabled: bool) {
        if screen.is_some() {
            return;
        }
        let inner = self.inner.lock().expect("session manager lock poisoned");
        if let Some(Some(TuiPipeline::Raw { detector, .. })) = inner.live.get(name).map(|l| &l.pipeline) {
            detector.lock().expect("frame detector lock poisoned").set_snapshot_mode(enabled);
        }
    }

    async fn run_snapshot_cycle(
        &self,
        name: &str,
        screen: &Option<Arc<VtScreen>>,
        cols: u16,
        rows: u16,
        settle: Duration,
        deadline: Instant,
    ) -> Result<ReadResult, DaemonError> {
        // (a) wait up to 2s for the child's initial render if empty.
        let initial_deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let metric = self.snapshot_metric(name, screen)?;
            if metric != 0 || Instant::now() >= initial_deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // (b) clear store + reset detector (raw-buffer only).
        if screen.is_none() {
            self.store.clear(name)?;
            let inner = self.inner.lock().expect("session manager lock poisoned");
            if let Some(Some(TuiPipeline::Raw { detector, .. })) =
                inner.live.get(name).map(|l| &l.pipeline)
            {
                detector.lock().expect("frame detector lock poisoned").reset();
            }
        }

        // (d) resize cycle.
        self.resize_and_signal(name, cols + 1, rows + 1)?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.resize_and_signal(name, cols, rows)?;
        if let Some(screen) = screen {
            screen.resize(cols, rows);
        }

        // (e) settle loop.
        if self.settle_loop(name, screen, settle, deadline).await? {
            return self.snapshot_output(name, screen);
        }

        // (f) one more SIGWINCH + doubled settle duration, if time remains.
        if Instant::now() < deadline {
            {
                let inner = self.inner.lock().expect("session manager lock poisoned");
                if let Some(pty) = inner.pty.get(name) {
                    pty.signal_winch();
                }
            }
            if self.settle_loop(name, screen, settle * 2, deadline).await? {
                return self.snapshot_output(name, screen);
            }
        }

        Err(DaemonError::Internal(format!(
            "snapshot for '{name}' did not settle before timeout"
        )))
    }

    fn resize_and_signal(&self, name: &str, cols: u16, rows: u16) -> Result<(), DaemonError> {
        let mut inner = self.inner.lock().expect("session manager lock poisoned");
        let pty = inner
            .pty
            .get_mut(name)
            .ok_or_else(|| DaemonError::SessionNotRunning(name.to_string()))?;
        pty.resize(cols, rows)?;
        pty.signal_winch();
        Ok(())
    }

    fn snapshot_metric(&self, name: &str, screen: &Option<Arc<VtScreen>>) -> Result<u64, DaemonError> {
        match screen {
            Some(screen) => Ok(screen.version()),
            None => self.store.size(name),
        }
    }

    async fn settle_loop(
        &self,
        name: &str,
        screen: &Option<Arc<VtScreen>>,
        settle: Duration,
        deadline: Instant,
    ) -> Result<bool, DaemonError> {
        let mut last_value = self.snapshot_metric(name, screen)?;
        let mut last_change = Instant::now();
        loop {
            tokio::time::sleep(Duration::from_millis(25)).await;
            let value = self.snapshot_metric(name, screen)?;
            if value != last_value {
                last_value = value;
                last_change = Instant::now();
            }
            if last_value != 0 && Instant::now().duration_since(last_change) >= settle {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    fn snapshot_output(&self, name: &str, screen: &Option<Arc<VtScreen>>) -> Result<ReadResult, DaemonError> {
        let meta = self.store.load_meta(name)?;
        let (output, position) = match screen {
            Some(screen) => (screen.string(), screen.version()),
            None => (
                String::from_utf8_lossy(&self.store.read_all(name)?).into_owned(),
                self.store.size(name)?,
            ),
        };
        Ok(ReadResult { output, position, state: meta.state })
    }

    // ---------------------------------------------------------------
    // resize / stop / kill / clear / search / info / size / list
    // ---------------------------------------------------------------

    pub async fn resize(&self, name: &str, cols: Option<u16>, rows: Option<u16>) -> Result<(), DaemonError> {
        if cols.is_none() && rows.is_none() {
            return Err(DaemonError::Validation(
                "resize requires at least one of cols/rows".to_string(),
            ));
        }
        if cols.is_some_and(|c| c == 0) || rows.is_some_and(|r| r == 0) {
            return Err(DaemonError::Validation("cols/rows must be positive".to_string()));
        }

        let meta = self.store.load_meta(name)?;
        if meta.state != SessionState::Running {
            return Err(DaemonError::SessionNotRunning(name.to_string()));
        }
        let new_cols = cols.unwrap_or(meta.cols);
        let new_rows = rows.unwrap_or(meta.rows);

        self.resize_and_signal(name, new_cols, new_rows)?;

        let screen = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            inner.live.get(name).and_then(|l| l.screen().cloned())
        };
        if let Some(screen) = screen {
            screen.resize(new_cols, new_rows);
        }

        self.store.update_meta(name, &mut |m| {
            m.cols = new_cols;
            m.rows = new_rows;
        })
    }

    /// Idempotent. Returns `true` if the session was already stopped.
    pub async fn stop(&self, name: &str) -> Result<bool, DaemonError> {
        let meta = self.store.load_meta(name)?;
        if meta.state == SessionState::Stopped {
            return Ok(true);
        }

        info!(event = "daemon.session.stop_started", session = name);

        let (cancel, pty) = {
            let mut inner = self.inner.lock().expect("session manager lock poisoned");
            let cancel = inner.live.get(name).map(|l| l.cancel.clone());
            let pty = inner.pty.remove(name);
            (cancel, pty)
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(mut pty) = pty {
            let grace = Duration::from_millis(self.config.kill_grace_period_ms);
            tokio::spawn(async move {
                pty.signal_term();
                tokio::time::sleep(grace).await;
                pty.signal_kill();
                let _ = tokio::task::spawn_blocking(move || {
                    let _ = pty.wait();
                })
                .await;
            });
        }

        let stopped_at = chrono::Utc::now().to_rfc3339();
        self.store.update_meta(name, &mut |m| {
            m.state = SessionState::Stopped;
            m.stopped_at = Some(stopped_at.clone());
        })?;

        info!(event = "daemon.session.stop_completed", session = name);
        Ok(false)
    }

    pub async fn kill(&self, name: &str) -> Result<(), DaemonError> {
        if !self.store.exists(name) {
            return Err(DaemonError::SessionNotFound(name.to_string()));
        }

        info!(event = "daemon.session.kill_started", session = name);

        let (cancel, pty, screen) = {
            let mut inner = self.inner.lock().expect("session manager lock poisoned");
            let cancel = inner.live.get(name).map(|l| l.cancel.clone());
            let screen = inner.live.get(name).and_then(|l| l.screen().cloned());
            let pty = inner.pty.remove(name);
            inner.live.remove(name);
            (cancel, pty, screen)
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(screen) = screen {
            tokio::spawn(async move { screen.close().await });
        }
        if let Some(mut pty) = pty {
            let grace = Duration::from_millis(self.config.kill_grace_period_ms);
            tokio::spawn(async move {
                pty.signal_term();
                tokio::time::sleep(grace).await;
                pty.signal_kill();
                let _ = tokio::task::spawn_blocking(move || {
                    let _ = pty.wait();
                })
                .await;
            });
        }

        self.store.delete(name)?;
        info!(event = "daemon.session.kill_completed", session = name);
        Ok(())
    }

    pub fn clear(&self, name: &str) -> Result<(), DaemonError> {
        self.store.clear(name)
    }

    pub fn search(
        &self,
        name: &str,
        pattern: &str,
        before: i64,
        after: i64,
        ignore_case: bool,
        strip_ansi: bool,
    ) -> Result<SearchResult, DaemonError> {
        if before < 0 || after < 0 {
            return Err(DaemonError::Validation("before/after must be non-negative".to_string()));
        }
        let before = before as usize;
        let after = after as usize;

        let bytes = self.store.read_all(name)?;
        let text = if strip_ansi {
            let meta = self.store.load_meta(name)?;
            crate::ansi::strip(&bytes, meta.cols as usize)
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };

        let pattern_str = if ignore_case { format!("(?i){pattern}") } else { pattern.to_string() };
        let re = regex::Regex::new(&pattern_str)
            .map_err(|e| DaemonError::Validation(format!("invalid search pattern: {e}")))?;

        let lines: Vec<&str> = text.split('\n').collect();
        let mut matches = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if re.is_match(line) {
                let before_start = idx.saturating_sub(before);
                let after_end = (idx + 1 + after).min(lines.len());
                matches.push(SearchMatch {
                    line_number: idx + 1,
                    line: (*line).to_string(),
                    before: lines[before_start..idx].iter().map(|s| (*s).to_string()).collect(),
                    after: lines[idx + 1..after_end].iter().map(|s| (*s).to_string()).collect(),
                });
            }
        }
        let total_matches = matches.len();
        Ok(SearchResult { matches, total_matches })
    }

    pub async fn info(&self, name: &str) -> Result<SessionInfo, DaemonError> {
        let meta = self.store.load_meta(name)?;
        let is_screen = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            inner.live.get(name).map(|l| l.is_screen_backed()).unwrap_or(false)
        };
        let buffered_bytes = if is_screen {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            inner
                .live
                .get(name)
                .and_then(|l| l.screen())
                .map(|s| s.version())
                .unwrap_or(0)
        } else {
            self.store.size(name)?
        };
        let uptime_secs = if meta.state == SessionState::Running {
            chrono::DateTime::parse_from_rfc3339(&meta.created_at)
                .ok()
                .map(|created| {
                    (chrono::Utc::now() - created.with_timezone(&chrono::Utc))
                        .num_seconds()
                        .max(0) as u64
                })
        } else {
            None
        };

        Ok(SessionInfo {
            name: meta.name,
            pid: meta.pid,
            command: meta.command,
            state: meta.state,
            created_at: meta.created_at,
            stopped_at: meta.stopped_at,
            buffered_bytes,
            position: meta.position,
            cols: meta.cols,
            rows: meta.rows,
            tui_mode: meta.tui_mode,
            uptime_secs,
        })
    }

    pub fn size(&self, name: &str) -> Result<u64, DaemonError> {
        let screen = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            inner.live.get(name).and_then(|l| l.screen().cloned())
        };
        match screen {
            Some(screen) => Ok(screen.version()),
            None => self.store.size(name),
        }
    }

    pub fn list(&self) -> Result<Vec<SessionDescriptor>, DaemonError> {
        let names = self.store.list_sessions()?;
        let mut descriptors = Vec::with_capacity(names.len());
        for name in names {
            let meta = self.store.load_meta(&name)?;
            descriptors.push(SessionDescriptor {
                name: meta.name,
                pid: meta.pid,
                command: meta.command,
                state: meta.state,
                created_at: meta.created_at,
                stopped_at: meta.stopped_at,
            });
        }
        Ok(descriptors)
    }

    /// Periodic TTL sweep (§4.8): delete any stopped session whose
    /// `stopped_at` is older than `ttl`.
    pub fn sweep_expired(&self, ttl: Duration) {
        let Ok(names) = self.store.list_sessions() else {
            return;
        };
        let now = chrono::Utc::now();
        for name in names {
            let Ok(meta) = self.store.load_meta(&name) else {
                continue;
            };
            if meta.state != SessionState::Stopped {
                continue;
            }
            let Some(stopped_at) = &meta.stopped_at else {
                continue;
            };
            let Ok(stopped) = chrono::DateTime::parse_from_rfc3339(stopped_at) else {
                continue;
            };
            let age = now.signed_duration_since(stopped.with_timezone(&chrono::Utc));
            let expired = age.to_std().map(|d| d > ttl).unwrap_or(false);
            if !expired {
                continue;
            }
            {
                let mut inner = self.inner.lock().expect("session manager lock poisoned");
                inner.live.remove(&name);
            }
            match self.store.delete(&name) {
                Ok(()) => info!(event = "daemon.ttl.session_expired", session = %name),
                Err(e) => warn!(event = "daemon.ttl.delete_failed", session = %name, error = %e),
            }
        }
    }

    /// Daemon shutdown (§5): cancel every running session's capture task,
    /// close PTYs, kill children, and persist `stopped`. Unlike `stop`,
    /// this waits for the grace period inline so the caller can be sure
    /// every child is gone before the process exits.
    pub async fn shutdown_all(&self) {
        let names = {
            let inner = self.inner.lock().expect("session manager lock poisoned");
            inner.pty.names()
        };
        for name in names {
            let (cancel, pty) = {
                let mut inner = self.inner.lock().expect("session manager lock poisoned");
                let cancel = inner.live.get(&name).map(|l| l.cancel.clone());
                let pty = inner.pty.remove(&name);
                (cancel, pty)
            };
            if let Some(cancel) = cancel {
                cancel.cancel();
            }
            if let Some(mut pty) = pty {
                pty.signal_term();
                tokio::time::sleep(Duration::from_millis(self.config.kill_grace_period_ms)).await;
                pty.signal_kill();
                let _ = tokio::task::spawn_blocking(move || {
                    let _ = pty.wait();
                })
                .await;
            }
            let stopped_at = chrono::Utc::now().to_rfc3339();
            let _ = self.store.update_meta(&name, &mut |m| {
                m.state = SessionState::Stopped;
                m.stopped_at = Some(stopped_at.clone());
            });
        }
    }
}

fn take_lines(text: &str, n: usize, head: bool) -> String {
    let parts: Vec<&str> = text.split('\n').collect();
    if head {
        parts.into_iter().take(n).collect::<Vec<_>>().join("\n")
    } else {
        let start = parts.len().saturating_sub(n);
        parts[start..].join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn manager() -> Arc<SessionManager> {
        let config = DaemonConfig {
            pty_read_deadline_ms: 20,
            kill_grace_period_ms: 20,
            ..Default::default()
        };
        SessionManager::new(config, Arc::new(MemoryStore::new(1024 * 1024)))
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_name() {
        let mgr = manager();
        let err = mgr
            .create("", None, &[], None, None, None, false, false, false)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "invalid_session_name");
    }

    #[tokio::test]
    async fn test_create_send_read_stop_lifecycle() {
        let mgr = manager();
        let info = mgr
            .create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
        assert_eq!(info.state, SessionState::Running);

        mgr.send("s1", "hello", true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let read = mgr.read("s1", ReadMode::New, None, None, None).await.unwrap();
        assert!(read.output.contains("hello"));

        let stopped = mgr.stop("s1").await.unwrap();
        assert!(!stopped);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let info = mgr.info("s1").await.unwrap();
        assert_eq!(info.state, SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mgr = manager();
        mgr.create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
        mgr.stop("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let already = mgr.stop("s1").await.unwrap();
        assert!(already);
    }

    #[tokio::test]
    async fn test_create_duplicate_without_if_not_exists_fails() {
        let mgr = manager();
        mgr.create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
        let err = mgr
            .create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "session_already_exists");
    }

    #[tokio::test]
    async fn test_create_duplicate_with_if_not_exists_returns_existing() {
        let mgr = manager();
        let first = mgr
            .create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
        let second = mgr
            .create("s1", Some("cat"), &[], None, None, None, false, false, true)
            .await
            .unwrap();
        assert_eq!(first.pid, second.pid);
    }

    #[tokio::test]
    async fn test_create_fails_for_stopped_session_surviving_restart() {
        // A stopped session's store entry must block recreation under the
        // same name even after the in-memory `live` map is wiped by a
        // daemon restart — only `kill` or TTL expiry may remove it.
        let store: Arc<dyn OutputStore> = Arc::new(MemoryStore::new(1024 * 1024));
        let config = DaemonConfig {
            pty_read_deadline_ms: 20,
            kill_grace_period_ms: 20,
            ..Default::default()
        };

        let mgr1 = SessionManager::new(config.clone(), Arc::clone(&store));
        mgr1.create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
        mgr1.stop("s1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Fresh manager over the same store stands in for a daemon restart:
        // `inner.live` starts empty, but the store entry survives.
        let mgr2 = SessionManager::new(config, store);
        mgr2.recover_orphaned_sessions();

        let err = mgr2
            .create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "session_already_exists");

        mgr2.kill("s1").await.unwrap();
        mgr2.create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_kill_removes_store_entry() {
        let mgr = manager();
        mgr.create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
        mgr.kill("s1").await.unwrap();
        let err = mgr.info("s1").await.unwrap_err();
        assert_eq!(err.error_code(), "session_not_found");
    }

    #[tokio::test]
    async fn test_resize_rejects_zero_dimensions() {
        let mgr = manager();
        mgr.create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
        let err = mgr.resize("s1", Some(0), None).await.unwrap_err();
        assert_eq!(err.error_code(), "validation_error");
    }

    #[tokio::test]
    async fn test_search_finds_line_with_context() {
        let mgr = manager();
        mgr.create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
        mgr.send("s1", "one", true).await.unwrap();
        mgr.send("s1", "needle", true).await.unwrap();
        mgr.send("s1", "three", true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let result = mgr.search("s1", "needle", 1, 1, false, false).unwrap();
        assert_eq!(result.total_matches, 1);
        assert_eq!(result.matches[0].before, vec!["one".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_rejects_non_tui_session() {
        let mgr = manager();
        mgr.create("s1", Some("cat"), &[], None, None, None, false, false, false)
            .await
            .unwrap();
        let err = mgr.snapshot("s1", None, None, None, None).await.unwrap_err();
        assert_eq!(err.error_code(), "not_tui_session");
    }

    #[test]
    fn test_take_lines_head_and_tail() {
        let text = "a\nb\nc\nd";
        assert_eq!(take_lines(text, 2, true), "a\nb");
        assert_eq!(take_lines(text, 2, false), "c\nd");
    }
}
