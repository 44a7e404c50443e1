//! Thread-safe VT100 emulator wrapper for screen-backed TUI sessions
//! (§4.4). Grounded on the teacher UI crate's `Term`/`FairMutex` wiring,
//! adapted from a GPUI-driven render loop to a daemon-side read/version
//! model with a tokio response-bridge task instead of a GPUI background
//! executor task.

use std::io::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use alacritty_terminal::event::{Event as AlacEvent, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::sync::FairMutex;
use alacritty_terminal::term::cell::Flags;
use alacritty_terminal::term::{Config as TermConfig, Term};
use alacritty_terminal::vte::ansi::{Color, NamedColor, Processor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

struct ScreenDimensions {
    cols: usize,
    rows: usize,
}

impl Dimensions for ScreenDimensions {
    fn total_lines(&self) -> usize {
        self.rows
    }
    fn screen_lines(&self) -> usize {
        self.rows
    }
    fn columns(&self) -> usize {
        self.cols
    }
}

struct ScreenListener {
    sender: mpsc::UnboundedSender<AlacEvent>,
}

impl EventListener for ScreenListener {
    fn send_event(&self, event: AlacEvent) {
        let _ = self.sender.send(event);
    }
}

/// Per-session VT emulator (§4.4). One instance per screen-backed TUI
/// session, shared between the capture task (writes) and request handlers
/// (reads), plus a dedicated response-bridge task.
pub struct VtScreen {
    term: Arc<FairMutex<Term<ScreenListener>>>,
    processor: StdMutex<Processor>,
    version: AtomicU64,
    event_tx: StdMutex<Option<mpsc::UnboundedSender<AlacEvent>>>,
    event_rx: StdMutex<Option<mpsc::UnboundedReceiver<AlacEvent>>>,
    bridge_handle: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl VtScreen {
    pub fn new(cols: u16, rows: u16) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = ScreenListener { sender: tx.clone() };
        let config = TermConfig::default();
        let dims = ScreenDimensions {
            cols: cols as usize,
            rows: rows as usize,
        };
        let term = Arc::new(FairMutex::new(Term::new(config, &dims, listener)));
        Arc::new(Self {
            term,
            processor: StdMutex::new(Processor::new()),
            version: AtomicU64::new(0),
            event_tx: StdMutex::new(Some(tx)),
            event_rx: StdMutex::new(Some(rx)),
            bridge_handle: StdMutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Feed bytes into the emulator. Bumps the version counter on any
    /// non-empty write.
    pub fn write(&self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        let mut term = self.term.lock();
        let mut processor = self.processor.lock().expect("vt processor lock poisoned");
        processor.advance(&mut term, bytes);
        drop(term);
        self.version.fetch_add(1, Ordering::AcqRel);
        bytes.len()
    }

    /// Current screen as plain text, `\r\n` collapsed to `\n`, trailing
    /// empty lines dropped.
    pub fn string(&self) -> String {
        let term = self.term.lock();
        let grid = term.grid();
        let cols = grid.columns();
        let mut lines: Vec<String> = Vec::with_capacity(grid.screen_lines());
        for row in 0..grid.screen_lines() {
            let line = alacritty_terminal::index::Line(row as i32);
            let mut text = String::with_capacity(cols);
            for col in 0..cols {
                let point = alacritty_terminal::index::Point::new(line, alacritty_terminal::index::Column(col));
                text.push(grid[point].c);
            }
            lines.push(text.trim_end().to_string());
        }
        drop(term);
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n").replace("\r\n", "\n")
    }

    /// Current screen with ANSI SGR styling retained.
    pub fn render(&self) -> String {
        let term = self.term.lock();
        let grid = term.grid();
        let cols = grid.columns();
        let mut out = String::new();
        for row in 0..grid.screen_lines() {
            let line = alacritty_terminal::index::Line(row as i32);
            let mut prev_fg: Option<Color> = None;
            let mut prev_bg: Option<Color> = None;
            let mut prev_bold = false;
            let mut styled_this_line = false;
            for col in 0..cols {
                let point = alacritty_terminal::index::Point::new(line, alacritty_terminal::index::Column(col));
                let cell = &grid[point];
                let bold = cell.flags.contains(Flags::BOLD);
                if Some(cell.fg) != prev_fg || Some(cell.bg) != prev_bg || bold != prev_bold {
                    out.push_str(&sgr_for(cell.fg, cell.bg, bold));
                    styled_this_line = true;
                    prev_fg = Some(cell.fg);
                    prev_bg = Some(cell.bg);
                    prev_bold = bold;
                }
                out.push(cell.c);
            }
            if styled_this_line {
                out.push_str("\x1b[0m");
            }
            out.push('\n');
        }
        drop(term);
        out.trim_end_matches('\n').to_string()
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        let dims = ScreenDimensions {
            cols: cols as usize,
            rows: rows as usize,
        };
        self.term.lock().resize(dims);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Spawn the dedicated task draining emulator-generated responses
    /// (e.g. DA/cursor-position replies) into the PTY master. Must be
    /// called once per session; the handle is awaited by `close`.
    pub fn spawn_response_bridge(self: &Arc<Self>, writer: Arc<StdMutex<Box<dyn std::io::Write + Send>>>) {
        let mut rx = self
            .event_rx
            .lock()
            .expect("vt event_rx lock poisoned")
            .take()
            .expect("spawn_response_bridge called more than once");
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let AlacEvent::PtyWrite(text) = event {
                    let Ok(mut w) = writer.lock() else { break };
                    if w.write_all(text.as_bytes()).and_then(|_| w.flush()).is_err() {
                        debug!(event = "daemon.vt_screen.response_write_failed");
                        break;
                    }
                }
            }
        });
        *self.bridge_handle.lock().expect("vt bridge_handle lock poisoned") = Some(handle);
    }

    /// Idempotent teardown: close the response pipe, await the bridge
    /// task, then the emulator is dropped along with this `Arc`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.event_tx.lock().expect("vt event_tx lock poisoned").take();
        let handle = self.bridge_handle.lock().expect("vt bridge_handle lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn sgr_for(fg: Color, bg: Color, bold: bool) -> String {
    let mut codes = vec!["0".to_string()];
    if bold {
        codes.push("1".to_string());
    }
    if let Some(code) = color_code(fg, true) {
        codes.push(code);
    }
    if let Some(code) = color_code(bg, false) {
        codes.push(code);
    }
    format!("\x1b[{}m", codes.join(";"))
}

fn color_code(color: Color, is_fg: bool) -> Option<String> {
    let base = if is_fg { 30 } else { 40 };
    let bright_base = if is_fg { 90 } else { 100 };
    match color {
        Color::Named(named) => named_offset(named).map(|o| (base + o).to_string()),
        Color::Spec(rgb) => Some(format!(
            "{};2;{};{};{}",
            if is_fg { 38 } else { 48 },
            rgb.r,
            rgb.g,
            rgb.b
        )),
        Color::Indexed(idx) if idx < 16 => {
            let offset = idx as u16;
            if offset < 8 {
                Some((base + offset).to_string())
            } else {
                Some((bright_base + (offset - 8)).to_string())
            }
        }
        Color::Indexed(idx) => Some(format!("{};5;{}", if is_fg { 38 } else { 48 }, idx)),
    }
}

fn named_offset(named: NamedColor) -> Option<u16> {
    Some(match named {
        NamedColor::Black => 0,
        NamedColor::Red => 1,
        NamedColor::Green => 2,
        NamedColor::Yellow => 3,
        NamedColor::Blue => 4,
        NamedColor::Magenta => 5,
        NamedColor::Cyan => 6,
        NamedColor::White => 7,
        NamedColor::BrightBlack => 8,
        NamedColor::BrightRed => 9,
        NamedColor::BrightGreen => 10,
        NamedColor::BrightYellow => 11,
        NamedColor::BrightBlue => 12,
        NamedColor::BrightMagenta => 13,
        NamedColor::BrightCyan => 14,
        NamedColor::BrightWhite => 15,
        _ => return None,
    })
}
