//! Per-connection request/response handling (§4.7, §6): decode one
//! length-prefixed (newline-terminated) JSON envelope, dispatch to the
//! session supervisor, encode one response, close the socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{info, warn};

use shelli_protocol::{
    Envelope, ReadResult, Request, Response, ResponseData, SessionDescriptor, SizeResult,
    PROTOCOL_VERSION,
};

use crate::errors::DaemonError;
use crate::session::SessionManager;

/// Handle a single request/response cycle on `stream`, then drop it.
pub async fn handle_connection(
    stream: UnixStream,
    manager: Arc<SessionManager>,
    client_deadline: Duration,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let response = match tokio::time::timeout(client_deadline, reader.read_line(&mut line)).await {
        Err(_) => {
            warn!(event = "daemon.server.connection_read_timeout");
            return;
        }
        Ok(Ok(0)) => return,
        Ok(Ok(_)) => dispatch_line(&line, &manager, client_deadline).await,
        Ok(Err(e)) => Response::err(format!("read error: {e}")),
    };

    let mut payload = match serde_json::to_vec(&response) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(event = "daemon.server.response_encode_failed", error = %e);
            return;
        }
    };
    payload.push(b'\n');
    if let Err(e) = writer.write_all(&payload).await {
        warn!(event = "daemon.server.response_write_failed", error = %e);
    }
}

/// Decode, version-check, and dispatch one request line. The handler runs
/// in its own task so a panic is caught by the join handle instead of
/// taking the connection-handling task (or the daemon) down with it, and
/// so it can be bounded by `client_deadline − 5s` (§5).
async fn dispatch_line(line: &str, manager: &Arc<SessionManager>, client_deadline: Duration) -> Response {
    let envelope: Envelope = match serde_json::from_str(line.trim_end()) {
        Ok(e) => e,
        Err(e) => return Response::err(format!("invalid request: {e}")),
    };
    if envelope.version != PROTOCOL_VERSION {
        return Response::err(format!(
            "protocol version mismatch: client={}, daemon={}",
            envelope.version, PROTOCOL_VERSION
        ));
    }

    let manager = Arc::clone(manager);
    let request = envelope.request;
    let budget = client_deadline.saturating_sub(Duration::from_secs(5));

    let handler = tokio::spawn(async move {
        match tokio::time::timeout(budget, route(request, &manager)).await {
            Ok(result) => result,
            Err(_) => Err(DaemonError::Internal(
                "request exceeded client deadline".to_string(),
            )),
        }
    });

    match handler.await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            if e.is_user_error() {
                info!(event = "daemon.server.request_rejected", error = %e);
            } else {
                warn!(event = "daemon.server.request_failed", error = %e);
            }
            Response::err(e.to_string())
        }
        Err(join_err) => {
            warn!(event = "daemon.server.handler_panicked", error = %join_err);
            Response::err("internal error: request handler panicked".to_string())
        }
    }
}

async fn route(request: Request, manager: &Arc<SessionManager>) -> Result<Response, DaemonError> {
    match request {
        Request::Create {
            name,
            command,
            env,
            cwd,
            cols,
            rows,
            tui_mode,
            tui_screen,
            if_not_exists,
        } => {
            let env_pairs = parse_env_pairs(env.as_deref().unwrap_or(&[]));
            let cwd_path = cwd.map(PathBuf::from);
            let info = manager
                .create(
                    &name,
                    command.as_deref(),
                    &env_pairs,
                    cwd_path.as_deref(),
                    cols,
                    rows,
                    tui_mode,
                    tui_screen,
                    if_not_exists,
                )
                .await?;
            Ok(Response::ok(ResponseData::Created(to_descriptor(info))))
        }
        Request::List => {
            let sessions = manager.list()?;
            Ok(Response::ok(ResponseData::List(sessions)))
        }
        Request::Read {
            name,
            mode,
            head_lines,
            tail_lines,
            cursor,
            snapshot,
            settle_ms,
            timeout_sec,
        } => {
            let result: ReadResult = if snapshot {
                manager
                    .snapshot(&name, settle_ms, timeout_sec, head_lines, tail_lines)
                    .await?
            } else {
                manager
                    .read(&name, mode.unwrap_or_default(), head_lines, tail_lines, cursor.as_deref())
                    .await?
            };
            Ok(Response::ok(ResponseData::Read(result)))
        }
        Request::Send { name, input, newline } => {
            manager.send(&name, &input, newline).await?;
            Ok(Response::ok_empty())
        }
        Request::Stop { name } => {
            manager.stop(&name).await?;
            Ok(Response::ok_empty())
        }
        Request::Kill { name } => {
            manager.kill(&name).await?;
            Ok(Response::ok_empty())
        }
        Request::Clear { name } => {
            manager.clear(&name)?;
            Ok(Response::ok_empty())
        }
        Request::Resize { name, cols, rows } => {
            manager.resize(&name, cols, rows).await?;
            Ok(Response::ok_empty())
        }
        Request::Info { name } => {
            let info = manager.info(&name).await?;
            Ok(Response::ok(ResponseData::Info(info)))
        }
        Request::Search {
            name,
            pattern,
            before,
            after,
            ignore_case,
            strip_ansi,
        } => {
            let result = manager.search(
                &name,
                &pattern,
                before.unwrap_or(0) as i64,
                after.unwrap_or(0) as i64,
                ignore_case,
                strip_ansi,
            )?;
            Ok(Response::ok(ResponseData::Search(result)))
        }
        Request::Size { name } => {
            let size = manager.size(&name)?;
            Ok(Response::ok(ResponseData::Size(SizeResult { size })))
        }
        Request::Ping => Ok(Response::ok_empty()),
    }
}

/// Parse `KEY=VALUE` strings (§6 `env` field). Entries without `=` are
/// skipped rather than rejected — malformed env entries shouldn't fail an
/// otherwise-valid create.
fn parse_env_pairs(entries: &[String]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn to_descriptor(info: shelli_protocol::SessionInfo) -> SessionDescriptor {
    SessionDescriptor {
        name: info.name,
        pid: info.pid,
        command: info.command,
        state: info.state,
        created_at: info.created_at,
        stopped_at: info.stopped_at,
    }
}
