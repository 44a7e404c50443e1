//! In-process session record (§4.6): the half of a session's state that
//! lives only in memory, never in the output store. Pairs with a
//! `SessionMeta` record in the store, which is the durable half.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::frame_detector::FrameDetector;
use crate::responder::TerminalResponder;
use crate::vt_screen::VtScreen;

/// The per-session TUI pipeline. `None` on a `LiveSession` means plain
/// output: the capture task appends PTY bytes to the store unfiltered.
pub enum TuiPipeline {
    /// Raw-buffer mode (§4.2, §4.3): a frame detector decides where the
    /// store should truncate, a responder answers capability queries
    /// inline before bytes ever reach the detector.
    Raw {
        detector: Mutex<FrameDetector>,
        responder: Mutex<TerminalResponder>,
    },
    /// Screen-backed mode (§4.4): a VT100 emulator is the source of truth
    /// for reads; the store still receives appends for `search`, but
    /// `read`/`snapshot` go through the emulator instead.
    Screen(Arc<VtScreen>),
}

/// Live half of a running session: the capture task's cancellation
/// signal and, for TUI sessions, the pipeline that turns raw PTY bytes
/// into store-ready frames. Dropped once the session stops.
pub struct LiveSession {
    pub cancel: CancellationToken,
    pub pipeline: Option<TuiPipeline>,
}

impl LiveSession {
    pub fn plain(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            pipeline: None,
        }
    }

    pub fn raw_tui(cancel: CancellationToken, max_size: usize) -> Self {
        Self {
            cancel,
            pipeline: Some(TuiPipeline::Raw {
                detector: Mutex::new(FrameDetector::new(max_size)),
                responder: Mutex::new(TerminalResponder::new()),
            }),
        }
    }

    pub fn screen_tui(cancel: CancellationToken, screen: Arc<VtScreen>) -> Self {
        Self {
            cancel,
            pipeline: Some(TuiPipeline::Screen(screen)),
        }
    }

    pub fn is_tui(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn is_screen_backed(&self) -> bool {
        matches!(self.pipeline, Some(TuiPipeline::Screen(_)))
    }

    pub fn screen(&self) -> Option<&Arc<VtScreen>> {
        match &self.pipeline {
            Some(TuiPipeline::Screen(screen)) => Some(screen),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_session_has_no_pipeline() {
        let session = LiveSession::plain(CancellationToken::new());
        assert!(!session.is_tui());
        assert!(session.screen().is_none());
    }

    #[test]
    fn test_raw_tui_session_is_tui_not_screen_backed() {
        let session = LiveSession::raw_tui(CancellationToken::new(), 1024);
        assert!(session.is_tui());
        assert!(!session.is_screen_backed());
        assert!(session.screen().is_none());
    }

    #[test]
    fn test_screen_tui_session_exposes_screen() {
        let screen = VtScreen::new(80, 24);
        let session = LiveSession::screen_tui(CancellationToken::new(), screen);
        assert!(session.is_tui());
        assert!(session.is_screen_backed());
        assert!(session.screen().is_some());
    }

    #[test]
    fn test_cancel_token_cancels_independently() {
        let cancel = CancellationToken::new();
        let session = LiveSession::plain(cancel.clone());
        assert!(!session.cancel.is_cancelled());
        cancel.cancel();
        assert!(session.cancel.is_cancelled());
    }
}
