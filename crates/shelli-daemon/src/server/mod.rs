pub mod connection;
pub mod shutdown;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::errors::DaemonError;
use crate::pid;
use crate::session::SessionManager;
use crate::store::file::FileStore;
use crate::store::memory::MemoryStore;
use crate::store::OutputStore;
use crate::ttl;
use crate::types::{DaemonConfig, StoreBackend};

/// Run the daemon server.
///
/// 1. Checks for an existing daemon via its PID file.
/// 2. Writes a PID file.
/// 3. Constructs the output store and session supervisor, then marks any
///    persisted `running` session as `stopped` (§9/§11 startup recovery).
/// 4. Binds the Unix socket.
/// 5. Spawns the TTL cleaner (if configured) and the shutdown-signal task.
/// 6. Accepts client connections in a loop until a shutdown signal fires.
/// 7. Gracefully stops every running session, then removes the PID and
///    socket files.
pub async fn run_server(config: DaemonConfig) -> Result<(), DaemonError> {
    let pid_path = config.pid_path.clone();
    let socket_path = config.socket_path.clone();

    if let Some(existing_pid) = pid::check_daemon_running(&pid_path) {
        return Err(DaemonError::AlreadyRunning(existing_pid));
    }

    pid::write_pid_file(&pid_path)?;

    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(&socket_path)?;

    info!(
        event = "daemon.server.started",
        pid = std::process::id(),
        socket = %socket_path.display(),
    );

    let store: Arc<dyn OutputStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(config.memory_cap_bytes)),
        StoreBackend::File => Arc::new(FileStore::new(config.data_dir.clone())),
    };
    let session_manager = SessionManager::new(config.clone(), store);
    session_manager.recover_orphaned_sessions();

    let shutdown = CancellationToken::new();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown::wait_for_shutdown_signal(signal_shutdown).await;
    });

    if let Some(ttl_secs) = config.ttl_secs {
        let ttl_manager = Arc::clone(&session_manager);
        let ttl_shutdown = shutdown.clone();
        tokio::spawn(ttl::run_ttl_cleaner(ttl_manager, ttl_secs, ttl_shutdown));
    }

    let client_deadline = Duration::from_secs(config.client_deadline_secs);

    loop {
        tokio::select! {
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let mgr = Arc::clone(&session_manager);
                        tokio::spawn(connection::handle_connection(stream, mgr, client_deadline));
                    }
                    Err(e) => {
                        error!(event = "daemon.server.accept_failed", error = %e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!(event = "daemon.server.shutdown_started");
                break;
            }
        }
    }

    session_manager.shutdown_all().await;
    cleanup(&pid_path, &socket_path);

    info!(event = "daemon.server.shutdown_completed");
    Ok(())
}

fn cleanup(pid_path: &Path, socket_path: &Path) {
    if let Err(e) = pid::remove_pid_file(pid_path) {
        error!(event = "daemon.server.pid_cleanup_failed", error = %e);
    }
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            error!(event = "daemon.server.socket_cleanup_failed", error = %e);
        }
    }
}
