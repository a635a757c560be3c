//! The narrow slice of a rendering engine that the translation pipeline consumes.
//!
//! Pagination, CFI computation, and spine/TOC parsing belong to the engine. The
//! pipeline only asks it to resolve references, load section markup, and display
//! a target.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocItem {
    pub href: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subitems: Vec<TocItem>,
}

/// A document in the book's linear reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineSection {
    pub index: usize,
    pub href: String,
    pub idref: String,
}

/// Start of the currently displayed range, as reported by `relocated` events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub start_href: Option<String>,
    pub start_cfi: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub creator: Option<String>,
}

#[async_trait]
pub trait RenderingEngine: Send + Sync {
    fn metadata(&self) -> BookMetadata;

    /// Nested table of contents in document order.
    fn toc(&self) -> Vec<TocItem>;

    /// Resolves an href, idref, or CFI to a spine section.
    fn spine_get(&self, reference: &str) -> Option<SpineSection>;

    fn spine_at(&self, index: usize) -> Option<SpineSection>;

    /// Loads the structural (X)HTML document of a section.
    async fn load_section(&self, section: &SpineSection) -> anyhow::Result<String>;

    /// Shows `target`, or the current/first position when `None`. Fails when the
    /// target cannot be resolved.
    async fn display(&self, target: Option<&str>) -> anyhow::Result<()>;

    /// Whether the view currently holds rendered content.
    fn has_rendered_content(&self) -> bool;

    fn current_location(&self) -> Option<Location>;

    async fn generate_locations(&self, chars_per_location: usize) -> anyhow::Result<()>;

    /// Fraction in `0.0..=1.0`; `None` until locations exist or for unknown CFIs.
    fn percentage_from_cfi(&self, cfi: &str) -> Option<f64>;

    fn cfi_from_percentage(&self, percentage: f64) -> Option<String>;
}
