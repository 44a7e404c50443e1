use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, info};

use crate::errors::DaemonError;

/// Resolve a session's command line (§4.6 create):
/// - empty → the user's default shell (`$SHELL`, falling back to `/bin/sh`)
/// - contains whitespace → run via the shell as `-c "<command>"`
/// - otherwise → exec the program directly, no args
pub fn resolve_command(command: &str) -> CommandBuilder {
    let shell = || std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    if command.trim().is_empty() {
        CommandBuilder::new(shell())
    } else if command.contains(char::is_whitespace) {
        let mut cmd = CommandBuilder::new(shell());
        cmd.arg("-c");
        cmd.arg(command);
        cmd
    } else {
        CommandBuilder::new(command)
    }
}

/// Handle to a live PTY session: master end, child process, and a
/// single-writer stdin handle.
pub struct ManagedPty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    /// `take_writer()` can only be called once; wrapped so multiple
    /// callers (capture task, `send`) can write without re-acquiring it.
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    size: PtySize,
}

impl ManagedPty {
    pub fn size(&self) -> PtySize {
        self.size
    }

    /// Clone the PTY master reader for reading output in the capture task.
    pub fn try_clone_reader(&self) -> Result<Box<dyn std::io::Read + Send>, DaemonError> {
        self.master
            .try_clone_reader()
            .map_err(|e| DaemonError::PtyError(format!("clone reader: {e}")))
    }

    /// Write bytes to PTY stdin in a single call; retries partial writes
    /// to completion (§4.6 `send`).
    pub fn write_stdin(&self, data: &[u8]) -> Result<(), DaemonError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DaemonError::PtyError("writer lock poisoned".to_string()))?;
        writer
            .write_all(data)
            .map_err(|e| DaemonError::PtyError(format!("write stdin: {e}")))?;
        writer
            .flush()
            .map_err(|e| DaemonError::PtyError(format!("flush stdin: {e}")))?;
        Ok(())
    }

    /// Resize the PTY window. Does not itself send `SIGWINCH` — callers
    /// explicitly signal the child afterward per §4.6 `resize`, since the
    /// kernel-implicit signal on `TIOCSWINSZ` may be missed by some
    /// children.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), DaemonError> {
        let new_size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        self.master
            .resize(new_size)
            .map_err(|e| DaemonError::PtyError(format!("resize: {e}")))?;
        self.size = new_size;
        debug!(event = "daemon.pty.resize_completed", cols = cols, rows = rows);
        Ok(())
    }

    pub fn child_process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Clone the writer handle so a caller can write to PTY stdin without
    /// holding the session manager's global lock (§4.6 `send`, §5).
    pub fn writer_handle(&self) -> Arc<Mutex<Box<dyn Write + Send>>> {
        self.writer.clone()
    }

    /// Block until the child exits. Called from the capture task's exit
    /// path (§4.6 capture task, step 5), never under the global lock.
    pub fn wait(&mut self) -> Result<portable_pty::ExitStatus, DaemonError> {
        self.child
            .wait()
            .map_err(|e| DaemonError::PtyError(format!("wait: {e}")))
    }

    /// Send `SIGTERM` to the child. Fire-and-forget (§4.6 `stop`).
    pub fn signal_term(&self) {
        send_signal(self.child_process_id(), Signal::SIGTERM);
    }

    /// Send `SIGKILL` to the child. Fire-and-forget (§4.6 `stop`).
    pub fn signal_kill(&self) {
        send_signal(self.child_process_id(), Signal::SIGKILL);
    }

    /// Send `SIGWINCH` to the child, explicitly, in case the OS-level
    /// resize didn't already deliver one (§4.6 `resize`, §9).
    pub fn signal_winch(&self) {
        send_signal(self.child_process_id(), Signal::SIGWINCH);
    }
}

fn send_signal(pid: Option<u32>, sig: Signal) {
    let Some(pid) = pid else { return };
    let _ = signal::kill(Pid::from_raw(pid as i32), sig);
}

/// Owns all live PTY instances in the daemon, keyed by session name.
pub struct PtyManager {
    ptys: HashMap<String, ManagedPty>,
}

impl PtyManager {
    pub fn new() -> Self {
        Self {
            ptys: HashMap::new(),
        }
    }

    /// Spawn a command in a new PTY sized `(cols, rows)`. `env` entries
    /// are applied on top of the inherited environment plus
    /// `TERM=xterm-256color` (§4.6 create).
    pub fn create(
        &mut self,
        name: &str,
        command: &str,
        env: &[(String, String)],
        cwd: Option<&Path>,
        cols: u16,
        rows: u16,
    ) -> Result<&ManagedPty, DaemonError> {
        if self.ptys.contains_key(name) {
            return Err(DaemonError::SessionAlreadyExists(name.to_string()));
        }

        let pty_system = native_pty_system();
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = pty_system
            .openpty(size)
            .map_err(|e| DaemonError::PtyError(format!("openpty: {e}")))?;

        let mut cmd = resolve_command(command);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in env {
            cmd.env(key, value);
        }
        if let Some(cwd) = cwd {
            cmd.cwd(cwd);
        }

        info!(
            event = "daemon.pty.create_started",
            session = name,
            command = command,
            cols = cols,
            rows = rows,
        );

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| DaemonError::PtyError(format!("spawn: {e}")))?;
        let pid = child.process_id();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| DaemonError::PtyError(format!("take writer: {e}")))?;

        let managed = ManagedPty {
            master: pair.master,
            child,
            writer: Arc::new(Mutex::new(writer)),
            size,
        };
        self.ptys.insert(name.to_string(), managed);

        info!(event = "daemon.pty.create_completed", session = name, pid = ?pid);

        Ok(self.ptys.get(name).expect("PTY just inserted must exist"))
    }

    pub fn get(&self, name: &str) -> Option<&ManagedPty> {
        self.ptys.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ManagedPty> {
        self.ptys.get_mut(name)
    }

    /// Remove and return a managed PTY without touching the child process.
    pub fn remove(&mut self, name: &str) -> Option<ManagedPty> {
        let pty = self.ptys.remove(name);
        if pty.is_some() {
            debug!(event = "daemon.pty.remove_completed", session = name);
        }
        pty
    }

    pub fn count(&self) -> usize {
        self.ptys.len()
    }

    /// Session names with a live PTY, for shutdown sweeps.
    pub fn names(&self) -> Vec<String> {
        self.ptys.keys().cloned().collect()
    }
}

impl Default for PtyManager {
    fn default() -> Self {
        Self::new()
    }
}
