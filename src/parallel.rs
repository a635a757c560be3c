//! Side-by-side alignment of original and translated paragraphs.

use serde::Serialize;

use crate::extract::split_into_paragraphs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParallelRow {
    pub original: String,
    pub translated: String,
}

/// One row per paragraph position; the shorter side is padded with empty cells.
pub fn align_rows(originals: &[String], translated_text: &str) -> Vec<ParallelRow> {
    let translated = split_into_paragraphs(translated_text);
    let len = originals.len().max(translated.len());
    (0..len)
        .map(|i| ParallelRow {
            original: originals.get(i).cloned().unwrap_or_default(),
            translated: translated.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

/// Scroll state of a scrollable pane, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    fn max_scroll(&self) -> f64 {
        self.scroll_height - self.client_height
    }

    /// Position within the scrollable range, in percent. A pane that cannot
    /// scroll is at 0%.
    pub fn percent(&self) -> f64 {
        let max = self.max_scroll();
        if max <= 0.0 {
            return 0.0;
        }
        (self.scroll_top / max * 100.0).clamp(0.0, 100.0)
    }

    /// `scroll_top` that places this pane at `percent`.
    pub fn offset_for_percent(&self, percent: f64) -> f64 {
        let max = self.max_scroll();
        if max <= 0.0 {
            return 0.0;
        }
        percent.clamp(0.0, 100.0) / 100.0 * max
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParallelView {
    rows: Vec<ParallelRow>,
    visible: bool,
    scroll_percent: f64,
}

impl ParallelView {
    /// Without translated text the view is hidden and only the original shows.
    pub fn render(&mut self, originals: &[String], translated_text: Option<&str>) {
        match translated_text.filter(|text| !text.trim().is_empty()) {
            Some(text) => {
                self.rows = align_rows(originals, text);
                self.visible = true;
            }
            None => self.hide(),
        }
    }

    pub fn hide(&mut self) {
        self.rows.clear();
        self.visible = false;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn rows(&self) -> &[ParallelRow] {
        &self.rows
    }

    pub fn sync_scroll(&mut self, percent: f64) {
        self.scroll_percent = percent.clamp(0.0, 100.0);
    }

    pub fn scroll_percent(&self) -> f64 {
        self.scroll_percent
    }

    /// Where the parallel pane should scroll to. A hidden view rests at the top.
    pub fn scroll_offset(&self, pane: &ScrollMetrics) -> f64 {
        if !self.visible {
            return 0.0;
        }
        pane.offset_for_percent(self.scroll_percent)
    }
}
