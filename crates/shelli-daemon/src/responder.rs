//! Terminal capability-query interceptor (§4.3). Recognizes queries a TUI
//! child may block waiting on, strips them from the output stream, and
//! writes canned replies back to the PTY master.

use std::io::Write;
use std::sync::{Arc, LazyLock, Mutex};

use regex::bytes::Regex;
use tracing::debug;

const MAX_SEQUENCE_LEN: usize = 32;

static QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b\[(?:(?P<primary>0?c)|>(?P<secondary>0?c)|(?P<cursor>6n)|\?(?P<kitty>u)|\?(?P<decrpm>[0-9]+)\$p)",
    )
    .unwrap()
});
static ANY_ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07]*?(?:\x07|\x1b\\)|[a-zA-Z])").unwrap()
});

/// Byte-stream filter for one TUI session in raw-buffer mode. Owned
/// exclusively by the capture task; writes go through a shared writer lock
/// (also used by `send`) so replies interleave safely with user input.
pub struct TerminalResponder {
    pending: Vec<u8>,
}

impl TerminalResponder {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Strip recognized queries from `chunk`, writing canned replies to
    /// `writer`. Returns the bytes that should continue on to the frame
    /// detector / output store.
    pub fn process(&mut self, chunk: &[u8], writer: &Arc<Mutex<Box<dyn Write + Send>>>) -> Vec<u8> {
        let mut combined = std::mem::take(&mut self.pending);
        combined.extend_from_slice(chunk);

        let mut out = Vec::with_capacity(combined.len());
        let mut last_end = 0usize;

        for caps in QUERY_RE.captures_iter(&combined) {
            let whole = caps.get(0).unwrap();
            out.extend_from_slice(&combined[last_end..whole.start()]);
            last_end = whole.end();
            write_reply(writer, &reply_for(&caps));
        }
        out.extend_from_slice(&combined[last_end..]);

        // Defer a trailing possible escape prefix to the next call.
        let keep_from = out.len().saturating_sub(MAX_SEQUENCE_LEN);
        if let Some(esc_at) = out[keep_from..].iter().rposition(|&b| b == 0x1b) {
            let abs = keep_from + esc_at;
            if !ANY_ESCAPE_RE.is_match(&out[abs..]) {
                self.pending = out.split_off(abs);
            }
        }
        out
    }

    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}

impl Default for TerminalResponder {
    fn default() -> Self {
        Self::new()
    }
}

fn reply_for(caps: &regex::bytes::Captures) -> Vec<u8> {
    if caps.name("primary").is_some() {
        b"\x1b[?62;1;2;6;7;8;9;15;22c".to_vec()
    } else if caps.name("secondary").is_some() {
        b"\x1b[>1;1;0c".to_vec()
    } else if caps.name("cursor").is_some() {
        b"\x1b[1;1R".to_vec()
    } else if caps.name("kitty").is_some() {
        b"\x1b[?0u".to_vec()
    } else if let Some(mode) = caps.name("decrpm") {
        let mode = String::from_utf8_lossy(mode.as_bytes());
        format!("\x1b[?{mode};0$y").into_bytes()
    } else {
        Vec::new()
    }
}

fn write_reply(writer: &Arc<Mutex<Box<dyn Write + Send>>>, reply: &[u8]) {
    let Ok(mut w) = writer.lock() else { return };
    if w.write_all(reply).and_then(|_| w.flush()).is_err() {
        debug!(event = "daemon.responder.write_failed");
    }
}
