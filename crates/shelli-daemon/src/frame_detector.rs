//! Stateful stream filter deciding when raw-buffer TUI output marks a new
//! screen frame (§4.2), so the capture task can truncate the output store
//! instead of growing it without bound.

use std::sync::LazyLock;

use regex::bytes::Regex;

const MAX_SEQUENCE_LEN: usize = 32;
const HEURISTIC_TRAIL_LEN: usize = 20;
const CURSOR_HOME_COOLDOWN_BYTES: usize = 4096;
const CURSOR_JUMP_MAX_ROW_THRESHOLD: usize = 10;
const CURSOR_JUMP_LOOKAHEAD_BYTES: usize = 50;

static SCREEN_CLEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\x1b\[2J|\x1b\[\?1049h|\x1bc)").unwrap());
static SYNC_BEGIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[\?2026h").unwrap());
static RESET_OR_HIDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\x1b\[0?m|\x1b\[\?25l)").unwrap());
static CURSOR_HOME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[(?:1;1H|H)").unwrap());
static CURSOR_JUMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[(?P<row>[0-9]*)(?:;[0-9]*)?[HF]").unwrap()
});
static ANY_ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07]*?(?:\x07|\x1b\\)|[a-zA-Z])").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub truncate: bool,
    pub data_after: Vec<u8>,
}

#[derive(Debug, Clone)]
struct PendingJump {
    /// Bytes of the combined view consumed up to (and including) the jump
    /// sequence; fate decided by the start of the next chunk.
    boundary_len: usize,
}

/// Per-session frame boundary detector (§4.2). Not `Sync`; owned
/// exclusively by one capture task.
pub struct FrameDetector {
    pending: Vec<u8>,
    heuristic_trail: Vec<u8>,
    total_buffered: usize,
    bytes_since_any_boundary: usize,
    cooldown_remaining: usize,
    max_row_in_frame: usize,
    pending_jump: Option<PendingJump>,
    snapshot_mode: bool,
    max_size: usize,
}

impl FrameDetector {
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            heuristic_trail: Vec::new(),
            total_buffered: 0,
            bytes_since_any_boundary: 0,
            cooldown_remaining: 0,
            max_row_in_frame: 0,
            pending_jump: None,
            snapshot_mode: false,
            max_size,
        }
    }

    pub fn set_snapshot_mode(&mut self, enabled: bool) {
        self.snapshot_mode = enabled;
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.heuristic_trail.clear();
        self.total_buffered = 0;
        self.bytes_since_any_boundary = 0;
        self.cooldown_remaining = 0;
        self.max_row_in_frame = 0;
        self.pending_jump = None;
    }

    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    pub fn process(&mut self, chunk: &[u8]) -> ProcessResult {
        self.total_buffered += chunk.len();

        let mut combined = Vec::with_capacity(self.pending.len() + chunk.len());
        combined.extend_from_slice(&self.pending);
        let chunk_start_in_combined = combined.len();
        combined.extend_from_slice(chunk);
        self.pending.clear();

        if self.snapshot_mode {
            self.bytes_since_any_boundary += chunk.len();
            return self.finalize(&combined, None, chunk_start_in_combined);
        }

        // Resolve a deferred cursor-jump from the previous call first: the
        // new chunk's leading bytes (skipping escapes) decide its fate.
        let mut boundary: Option<usize> = None;
        if let Some(jump) = self.pending_jump.take() {
            if first_meaningful_is_printable(&combined, jump.boundary_len) {
                boundary = Some(chunk_start_in_combined);
            }
        }

        // Strategy 1: screen clear.
        if let Some(m) = SCREEN_CLEAR_RE.find_iter(&combined).last() {
            boundary = Some(boundary.map_or(m.end(), |b| b.max(m.end())));
        }

        // Strategy 2: sync begin.
        if let Some(m) = SYNC_BEGIN_RE.find_iter(&combined).last() {
            boundary = Some(boundary.map_or(m.end(), |b| b.max(m.end())));
        }

        // Strategy 3: cursor home with heuristic + cooldown.
        let mut search_base = self.heuristic_trail.clone();
        let offset = search_base.len();
        search_base.extend_from_slice(&combined);
        for m in CURSOR_HOME_RE.find_iter(&combined) {
            let abs_pos = offset + m.start();
            let window_start = abs_pos.saturating_sub(HEURISTIC_TRAIL_LEN);
            let preceded_by_reset = RESET_OR_HIDE_RE.is_match(&search_base[window_start..abs_pos]);
            let bytes_before_this = m.start();
            let in_cooldown = bytes_before_this < self.cooldown_remaining;
            if preceded_by_reset && !in_cooldown {
                boundary = Some(boundary.map_or(m.end(), |b| b.max(m.end())));
                self.cooldown_remaining = m.end() + CURSOR_HOME_COOLDOWN_BYTES;
            }
        }
        self.cooldown_remaining = self.cooldown_remaining.saturating_sub(combined.len());

        // Track highest cursor row observed, and strategy 4: cursor jump to top.
        let mut deferred_jump_end: Option<usize> = None;
        for caps in CURSOR_JUMP_RE.captures_iter(&combined) {
            let whole = caps.get(0).unwrap();
            let row: usize = caps
                .name("row")
                .and_then(|r| std::str::from_utf8(r.as_bytes()).ok())
                .and_then(|s| s.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(1);
            if row <= 2 && self.max_row_in_frame >= CURSOR_JUMP_MAX_ROW_THRESHOLD {
                if whole.end() == combined.len() {
                    deferred_jump_end = Some(whole.end());
                } else if printable_within(&combined, whole.end(), CURSOR_JUMP_LOOKAHEAD_BYTES) {
                    boundary = Some(boundary.map_or(whole.end(), |b| b.max(whole.end())));
                }
            }
            self.max_row_in_frame = self.max_row_in_frame.max(row);
        }
        if let Some(end) = deferred_jump_end {
            self.pending_jump = Some(PendingJump { boundary_len: end });
        }

        self.bytes_since_any_boundary += chunk.len();
        self.finalize(&combined, boundary, chunk_start_in_combined)
    }

    fn finalize(
        &mut self,
        combined: &[u8],
        mut boundary: Option<usize>,
        chunk_start: usize,
    ) -> ProcessResult {
        if boundary.is_some() {
            self.max_row_in_frame = 0;
            self.bytes_since_any_boundary = 0;
        }

        // Strategy 5: size-cap rescue, independent of the above.
        if !self.snapshot_mode
            && self.total_buffered > self.max_size
            && self.bytes_since_any_boundary <= 2 * self.max_size
        {
            self.total_buffered = combined.len() - chunk_start;
            self.bytes_since_any_boundary = 0;
            let data_after = combined[chunk_start..].to_vec();
            self.update_trail(combined);
            return ProcessResult {
                truncate: true,
                data_after,
            };
        }

        let (truncate, data_after) = match boundary.take() {
            Some(pos) => {
                let retained = &combined[pos..];
                self.total_buffered = retained.len();
                (true, retained.to_vec())
            }
            None => {
                // Defer a possible multi-byte escape prefix straddling the
                // next chunk boundary, and also a *complete* trailing
                // reset/hide-cursor sequence: on its own it's not a
                // boundary, but it may be the reset half of a
                // reset-then-cursor-home pair split across chunks (§4.2
                // strategy 3), so its fate has to wait for what follows.
                let keep_from = combined.len().saturating_sub(MAX_SEQUENCE_LEN);
                let tail = &combined[keep_from..];
                if let Some(esc_at) = tail.iter().rposition(|&b| b == 0x1b) {
                    let trailing = &tail[esc_at..];
                    let incomplete = !ANY_ESCAPE_RE.is_match(trailing);
                    let complete_reset_at_end = ANY_ESCAPE_RE
                        .find(trailing)
                        .is_some_and(|m| m.end() == trailing.len())
                        && RESET_OR_HIDE_RE.is_match(trailing);
                    if incomplete || complete_reset_at_end {
                        self.pending = trailing.to_vec();
                        return ProcessResult {
                            truncate: false,
                            data_after: combined[..keep_from + esc_at].to_vec(),
                        };
                    }
                }
                (false, combined.to_vec())
            }
        };

        self.update_trail(combined);
        ProcessResult { truncate, data_after }
    }

    fn update_trail(&mut self, combined: &[u8]) {
        let start = combined.len().saturating_sub(HEURISTIC_TRAIL_LEN);
        self.heuristic_trail = combined[start..].to_vec();
    }
}

fn printable_within(bytes: &[u8], start: usize, budget: usize) -> bool {
    let mut i = start;
    let mut considered = 0usize;
    while i < bytes.len() && considered < budget {
        let b = bytes[i];
        if b == 0x1b {
            if let Some(m) = ANY_ESCAPE_RE.find(&bytes[i..]) {
                i += m.end();
                continue;
            }
            i += 1;
            continue;
        }
        considered += 1;
        if b != b'\r' && b != b'\n' {
            return true;
        }
        i += 1;
    }
    false
}

fn first_meaningful_is_printable(bytes: &[u8], start: usize) -> bool {
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if b == 0x1b {
            match ANY_ESCAPE_RE.find(&bytes[i..]) {
                Some(m) => {
                    i += m.end();
                    continue;
                }
                None => return false,
            }
        }
        return b != b'\r' && b != b'\n';
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_clear_truncates() {
        let mut fd = FrameDetector::new(1024 * 1024);
        let result = fd.process(b"old frame\x1b[2Jnew frame");
        assert!(result.truncate);
        assert_eq!(result.data_after, b"new frame");
    }

    #[test]
    fn test_alternate_buffer_enable_truncates() {
        let mut fd = FrameDetector::new(1024 * 1024);
        let result = fd.process(b"prelude\x1b[?1049hscreen");
        assert!(result.truncate);
        assert_eq!(result.data_after, b"screen");
    }

    #[test]
    fn test_sync_begin_truncates() {
        let mut fd = FrameDetector::new(1024 * 1024);
        let result = fd.process(b"junk\x1b[?2026hframe-data");
        assert!(result.truncate);
        assert_eq!(result.data_after, b"frame-data");
    }

    #[test]
    fn test_cursor_home_without_reset_does_not_truncate() {
        let mut fd = FrameDetector::new(1024 * 1024);
        let result = fd.process(b"hello\x1b[1;1Hworld");
        assert!(!result.truncate);
    }

    #[test]
    fn test_cursor_home_after_reset_truncates() {
        let mut fd = FrameDetector::new(1024 * 1024);
        let result = fd.process(b"hello\x1b[0m\x1b[1;1Hworld");
        assert!(result.truncate);
        assert_eq!(result.data_after, b"world");
    }

    #[test]
    fn test_cursor_home_cooldown_suppresses_second_fire() {
        let mut fd = FrameDetector::new(1024 * 1024);
        let first = fd.process(b"\x1b[0m\x1b[1;1Hframe1");
        assert!(first.truncate);
        let second = fd.process(b"\x1b[0m\x1b[1;1Hframe2");
        assert!(!second.truncate);
    }

    #[test]
    fn test_pending_bytes_carry_across_chunk_boundary() {
        let mut fd = FrameDetector::new(1024 * 1024);
        let first = fd.process(b"abc\x1b[2");
        assert!(!first.truncate);
        assert_eq!(first.data_after, b"abc");
        let second = fd.process(b"Jdef");
        assert!(second.truncate);
        assert_eq!(second.data_after, b"def");
    }

    #[test]
    fn test_trailing_reset_deferred_then_resolves_as_cursor_home_boundary() {
        let mut fd = FrameDetector::new(1024 * 1024);
        let first = fd.process(b"old\x1b[0m");
        assert!(!first.truncate);
        assert_eq!(first.data_after, b"old");
        let second = fd.process(b"\x1b[1;1Hnew content");
        assert!(second.truncate);
        assert_eq!(second.data_after, b"new content");
    }

    #[test]
    fn test_flush_returns_pending_bytes() {
        let mut fd = FrameDetector::new(1024 * 1024);
        fd.process(b"abc\x1b[2");
        assert_eq!(fd.flush(), b"\x1b[2".to_vec());
        assert!(fd.flush().is_empty());
    }

    #[test]
    fn test_snapshot_mode_suppresses_all_strategies() {
        let mut fd = FrameDetector::new(1024 * 1024);
        fd.set_snapshot_mode(true);
        let result = fd.process(b"\x1b[2Jscreen clear inside snapshot");
        assert!(!result.truncate);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut fd = FrameDetector::new(1024 * 1024);
        fd.process(b"\x1b[0m\x1b[1;1Hone");
        fd.reset();
        let result = fd.process(b"\x1b[0m\x1b[1;1Htwo");
        assert!(result.truncate);
    }

    #[test]
    fn test_size_cap_rescue_truncates_after_recent_boundary() {
        let mut fd = FrameDetector::new(16);
        let r1 = fd.process(b"\x1b[2Jaaaaaaaa");
        assert!(r1.truncate);
        let r2 = fd.process(b"bbbbbbbbbbbbbbbbbbbbbbbb");
        assert!(r2.truncate);
        assert_eq!(r2.data_after, b"bbbbbbbbbbbbbbbbbbbbbbbb");
    }
}
