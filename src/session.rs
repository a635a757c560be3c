//! Mutable per-reader state, touched only at lifecycle events: book opened,
//! relocated, viewport scrolled, translation settled, book closed.

use serde::Serialize;

use crate::parallel::ParallelView;
use crate::reference::ChapterIdentity;

pub const INITIAL_STATUS: &str = "No translation yet.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub message: String,
    pub is_error: bool,
}

impl Default for StatusLine {
    fn default() -> Self {
        Self {
            message: INITIAL_STATUS.to_owned(),
            is_error: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReaderSession {
    pub current_href: Option<String>,
    pub current_chapter_id: Option<ChapterIdentity>,
    pub locations_ready: bool,
    /// Whole-book reading progress, `0..=100`.
    pub progress_percent: u32,
    /// Enabled by the first user-triggered translation, cleared on close.
    pub auto_translate: bool,
    pub translating: bool,
    /// Paragraphs of the chapter last rendered or looked up for display.
    pub last_original_paragraphs: Vec<String>,
    pub status: StatusLine,
    pub parallel: ParallelView,
}

impl ReaderSession {
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = StatusLine {
            message: message.into(),
            is_error: false,
        };
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = StatusLine {
            message: message.into(),
            is_error: true,
        };
    }

    /// Records progress and moves the parallel pane to the same position.
    pub fn update_progress(&mut self, percent: u32) {
        let percent = percent.min(100);
        self.progress_percent = percent;
        self.parallel.sync_scroll(f64::from(percent));
    }

    /// Renders `translated` against `originals` and remembers them as the
    /// current chapter's paragraphs.
    pub fn show_translation(&mut self, originals: &[String], translated: &str) {
        self.last_original_paragraphs = originals.to_vec();
        self.parallel.render(originals, Some(translated));
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
