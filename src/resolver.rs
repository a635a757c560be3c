//! Chapter identity resolution and multi-attempt display.
//!
//! TOC entries and spine hrefs are not always byte-identical (relative path
//! differences, fragments for multi-chapter documents), so every reference goes
//! through the engine's spine lookup before it is used as a chapter identity.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::{RenderingEngine, SpineSection, TocItem};
use crate::reference::{ChapterIdentity, NavigationReference, fragment, strip_fragment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterIndexEntry {
    pub id: ChapterIdentity,
    /// Spine-normalized reference (fragment preserved).
    pub href: String,
    /// Reference exactly as authored in the TOC.
    pub original_href: String,
    pub label: String,
    pub depth: usize,
}

/// Bounded wait for rendered content after a successful `display` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayPolling {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for DisplayPolling {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_millis(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

#[derive(Debug, thiserror::Error)]
#[error("unable to render chapter for target {target} ({attempts} candidates tried)")]
pub struct ChapterUnavailable {
    pub target: String,
    pub attempts: usize,
}

pub struct ChapterResolver {
    engine: Arc<dyn RenderingEngine>,
    index: Vec<ChapterIndexEntry>,
    polling: DisplayPolling,
}

impl ChapterResolver {
    /// Builds the flattened chapter index from the engine's TOC.
    pub fn new(engine: Arc<dyn RenderingEngine>, polling: DisplayPolling) -> Self {
        let mut resolver = Self {
            engine,
            index: Vec::new(),
            polling,
        };
        let toc = resolver.engine.toc();
        let mut index = Vec::new();
        resolver.flatten_toc(&toc, 0, &mut index);
        resolver.index = index;
        resolver
    }

    pub fn index(&self) -> &[ChapterIndexEntry] {
        &self.index
    }

    fn flatten_toc(&self, items: &[TocItem], depth: usize, out: &mut Vec<ChapterIndexEntry>) {
        for item in items {
            if let Some(href) = self.normalize_href(&item.href)
                && let Some(id) = ChapterIdentity::from_reference(&href)
            {
                out.push(ChapterIndexEntry {
                    id,
                    href,
                    original_href: item.href.clone(),
                    label: item.label.trim().to_owned(),
                    depth,
                });
            }
            self.flatten_toc(&item.subitems, depth + 1, out);
        }
    }

    /// Substitutes the spine's canonical href for the path part of `raw`, keeping
    /// the fragment. Falls back to the raw path when the spine does not know it.
    pub fn normalize_href(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        let path = strip_fragment(trimmed);
        if path.is_empty() {
            return None;
        }

        let resolved = match self.engine.spine_get(path) {
            Some(section) if !section.href.is_empty() => section.href,
            _ => {
                tracing::debug!(href = trimmed, "spine lookup failed; keeping raw path");
                path.to_owned()
            }
        };

        Some(match fragment(trimmed) {
            Some(hash) => format!("{resolved}#{hash}"),
            None => resolved,
        })
    }

    pub fn normalize(&self, reference: &NavigationReference) -> Option<String> {
        match reference {
            NavigationReference::Href(raw) => self.normalize_href(raw),
            NavigationReference::ChapterId(id) => self.normalize_href(id.as_str()),
            NavigationReference::Cfi(cfi) => match self.engine.spine_get(cfi) {
                Some(section) => Some(section.href),
                None => {
                    tracing::warn!(cfi = %cfi, "unable to resolve location to a spine section");
                    None
                }
            },
        }
    }

    pub fn identify(&self, reference: &NavigationReference) -> Option<ChapterIdentity> {
        let normalized = self.normalize(reference)?;
        ChapterIdentity::from_reference(&normalized)
    }

    pub fn spine_section(&self, reference: &NavigationReference) -> Option<SpineSection> {
        if let Some(normalized) = self.normalize(reference)
            && let Some(section) = self.engine.spine_get(strip_fragment(&normalized))
        {
            return Some(section);
        }
        self.engine.spine_get(reference.as_str())
    }

    pub fn adjacent(
        &self,
        reference: &NavigationReference,
        direction: Direction,
    ) -> Option<SpineSection> {
        let section = self.spine_section(reference)?;
        match direction {
            Direction::Next => self.engine.spine_at(section.index + 1),
            Direction::Prev => section
                .index
                .checked_sub(1)
                .and_then(|index| self.engine.spine_at(index)),
        }
    }

    /// Looks an entry up by chapter identity, raw href, or (case-insensitive) label.
    pub fn find_entry(&self, query: &str) -> Option<&ChapterIndexEntry> {
        let query = query.trim();
        if let Some(id) = self
            .normalize_href(query)
            .and_then(|href| ChapterIdentity::from_reference(&href))
            && let Some(entry) = self.index.iter().find(|entry| entry.id == id)
        {
            return Some(entry);
        }
        self.index.iter().find(|entry| {
            entry.original_href == query || entry.label.eq_ignore_ascii_case(query)
        })
    }

    /// Entry `offset` steps away from `current` in the flattened index, clamped to
    /// its bounds. `None` when the move would not change chapters.
    pub fn offset_entry(
        &self,
        current: Option<&NavigationReference>,
        offset: isize,
    ) -> Option<&ChapterIndexEntry> {
        let first = self.index.first()?;
        let len = self.index.len() as isize;

        let current_id = match current {
            Some(reference) => self
                .normalize(reference)
                .or_else(|| Some(reference.as_str().to_owned()))
                .and_then(|href| ChapterIdentity::from_reference(&href)),
            None => Some(first.id.clone()),
        };

        let mut current_index = current_id
            .and_then(|id| self.index.iter().position(|entry| entry.id == id))
            .map(|pos| pos as isize)
            .unwrap_or(-1);
        if current_index == -1 {
            current_index = if offset > 0 { -1 } else { len };
        }

        let target = current_index.saturating_add(offset).clamp(0, len - 1);
        if target == current_index {
            return None;
        }
        self.index.get(target as usize)
    }

    /// Ordered, de-duplicated display candidates: normalized primary, normalized
    /// fallback, raw primary, raw fallback, then the bare identity of each.
    pub fn display_attempts(&self, primary: &str, fallback: Option<&str>) -> Vec<String> {
        let mut attempts: Vec<String> = Vec::new();

        let fallback = fallback.filter(|fallback| *fallback != primary);
        let normalized_primary = self.normalize_href(primary);
        let normalized_fallback = fallback.and_then(|fallback| self.normalize_href(fallback));

        push_unique(&mut attempts, normalized_primary.as_deref().or(Some(primary)));
        push_unique(&mut attempts, normalized_fallback.as_deref().or(fallback));
        push_unique(&mut attempts, Some(primary));
        push_unique(&mut attempts, fallback);

        let listed = attempts.clone();
        for existing in &listed {
            if let Some(id) = ChapterIdentity::from_reference(existing) {
                push_unique(&mut attempts, Some(id.as_str()));
            }
        }
        attempts
    }

    /// Tries each candidate until one yields rendered content. The view is left
    /// unchanged when every candidate fails.
    pub async fn display_chapter(
        &self,
        target: &str,
        fallback: Option<&str>,
    ) -> Result<String, ChapterUnavailable> {
        let attempts = self.display_attempts(target, fallback);
        for candidate in &attempts {
            match self.engine.display(Some(candidate)).await {
                Ok(()) => {
                    if self.wait_for_content().await {
                        return Ok(candidate.clone());
                    }
                    tracing::debug!(href = %candidate, "display produced no content");
                }
                Err(err) => {
                    tracing::warn!(href = %candidate, ?err, "unable to display section");
                }
            }
        }
        tracing::warn!(target, "unable to render chapter for target");
        Err(ChapterUnavailable {
            target: target.to_owned(),
            attempts: attempts.len(),
        })
    }

    async fn wait_for_content(&self) -> bool {
        for _ in 0..=self.polling.retries {
            if self.engine.has_rendered_content() {
                return true;
            }
            tokio::time::sleep(self.polling.delay).await;
        }
        self.engine.has_rendered_content()
    }
}

fn push_unique(attempts: &mut Vec<String>, value: Option<&str>) {
    if let Some(value) = value.map(str::trim)
        && !value.is_empty()
        && !attempts.iter().any(|existing| existing == value)
    {
        attempts.push(value.to_owned());
    }
}
