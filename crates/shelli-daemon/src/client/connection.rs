//! Minimal request/response client (§6 transport) used by integration
//! tests to exercise the daemon over its real Unix socket, without
//! pulling in the end-user CLI front-end that is out of scope here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use shelli_protocol::{Envelope, Request, Response};

use crate::errors::DaemonError;

pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    /// Open a fresh connection, send one request, read one response, and
    /// close — mirroring the daemon's one-request-per-connection model.
    pub async fn send(&self, request: Request) -> Result<Response, DaemonError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| DaemonError::ConnectionFailed(e.to_string()))?;
        let (reader, mut writer) = stream.into_split();

        let mut payload = serde_json::to_vec(&Envelope::new(request))?;
        payload.push(b'\n');
        writer
            .write_all(&payload)
            .await
            .map_err(|e| DaemonError::ConnectionFailed(e.to_string()))?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(30), reader.read_line(&mut line))
            .await
            .map_err(|_| DaemonError::ConnectionFailed("response timeout".to_string()))?
            .map_err(|e| DaemonError::ConnectionFailed(e.to_string()))?;

        let response: Response = serde_json::from_str(line.trim_end())?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_holds_socket_path() {
        let client = DaemonClient::new("/tmp/shelli-test.sock");
        assert_eq!(client.socket_path, PathBuf::from("/tmp/shelli-test.sock"));
    }
}
