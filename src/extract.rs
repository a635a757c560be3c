//! Flattens a chapter's structural document into paragraph strings.

use std::collections::HashMap;
use std::sync::Arc;

use scraper::{ElementRef, Html};
use tokio::sync::Mutex;

use crate::engine::RenderingEngine;
use crate::reference::{ChapterIdentity, NavigationReference};
use crate::resolver::ChapterResolver;

/// Separator between paragraphs in chapter text and in translated text.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

const BLOCK_TAGS: &[&str] = &[
    "p",
    "li",
    "blockquote",
    "section",
    "article",
    "pre",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterContent {
    /// Paragraphs joined with [`PARAGRAPH_SEPARATOR`].
    pub text: String,
    pub paragraphs: Vec<String>,
}

impl ChapterContent {
    pub fn from_paragraphs(paragraphs: Vec<String>) -> Self {
        Self {
            text: paragraphs.join(PARAGRAPH_SEPARATOR),
            paragraphs,
        }
    }
}

/// Memoizes extracted chapters for the lifetime of one open book.
pub struct ContentExtractor {
    engine: Arc<dyn RenderingEngine>,
    memo: Mutex<HashMap<ChapterIdentity, Arc<ChapterContent>>>,
}

impl ContentExtractor {
    pub fn new(engine: Arc<dyn RenderingEngine>) -> Self {
        Self {
            engine,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `None` when the chapter cannot be resolved, fails to load, or has no
    /// readable text.
    pub async fn chapter_content(
        &self,
        resolver: &ChapterResolver,
        reference: &NavigationReference,
    ) -> Option<Arc<ChapterContent>> {
        let id = resolver.identify(reference)?;
        if let Some(hit) = self.memo.lock().await.get(&id) {
            return Some(Arc::clone(hit));
        }

        let Some(section) = resolver.spine_section(reference) else {
            tracing::debug!(chapter_id = %id, "chapter is not part of the spine");
            return None;
        };

        let markup = match self.engine.load_section(&section).await {
            Ok(markup) => markup,
            Err(err) => {
                tracing::warn!(chapter_id = %id, ?err, "unable to load section contents");
                return None;
            }
        };

        let paragraphs = collect_paragraphs(&markup);
        if paragraphs.is_empty() {
            tracing::debug!(chapter_id = %id, "chapter has no readable text");
            return None;
        }

        let content = Arc::new(ChapterContent::from_paragraphs(paragraphs));
        self.memo.lock().await.insert(id, Arc::clone(&content));
        Some(content)
    }
}

/// Collects leaf block elements in document order. A block that contains another
/// block is skipped so nested matches are never counted twice; when no block
/// exists the whole body becomes one paragraph.
pub fn collect_paragraphs(markup: &str) -> Vec<String> {
    let document = Html::parse_document(markup);
    let root = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
        .unwrap_or_else(|| document.root_element());

    let mut paragraphs = Vec::new();
    for el in root.descendants().filter_map(ElementRef::wrap) {
        if !is_block(el) {
            continue;
        }
        let has_nested_block = el
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .any(is_block);
        if has_nested_block {
            continue;
        }
        let text = collapse_whitespace(&el.text().collect::<String>());
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }

    if paragraphs.is_empty() {
        let text = collapse_whitespace(&root.text().collect::<String>());
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }
    paragraphs
}

/// Splits text on blank-line separators, trimming and dropping empty pieces.
pub fn split_into_paragraphs(text: &str) -> Vec<String> {
    text.split(PARAGRAPH_SEPARATOR)
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(str::to_owned)
        .collect()
}

fn is_block(el: ElementRef<'_>) -> bool {
    BLOCK_TAGS.contains(&el.value().name())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DisplayPolling;
    use crate::testing::MemoryEngine;

    const CHAPTER: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Ignored title</title></head>
<body>
  <section>
    <h1>Chapter   One</h1>
    <p>First
       paragraph.</p>
    <blockquote><p>Quoted line.</p></blockquote>
    <ul><li>Item <em>one</em></li><li>   </li></ul>
  </section>
</body>
</html>
"#;

    #[test]
    fn collects_leaf_blocks_without_double_counting() {
        let paragraphs = collect_paragraphs(CHAPTER);
        assert_eq!(
            paragraphs,
            vec!["Chapter One", "First paragraph.", "Quoted line.", "Item one"]
        );
    }

    #[test]
    fn falls_back_to_body_text_without_block_tags() {
        let markup = "<html><body><div>Just\n some   text</div><span>more</span></body></html>";
        assert_eq!(collect_paragraphs(markup), vec!["Just some textmore"]);
    }

    #[test]
    fn empty_body_yields_nothing() {
        assert!(collect_paragraphs("<html><body>  </body></html>").is_empty());
    }

    #[test]
    fn split_into_paragraphs_uses_blank_lines() {
        assert_eq!(
            split_into_paragraphs("A\n\nB\n\n\n C \nD\n\n"),
            vec!["A", "B", "C \nD"]
        );
        assert!(split_into_paragraphs("").is_empty());
    }

    #[test]
    fn content_text_joins_paragraphs() {
        let content = ChapterContent::from_paragraphs(vec!["A".into(), "B".into()]);
        assert_eq!(content.text, "A\n\nB");
        assert_eq!(split_into_paragraphs(&content.text), content.paragraphs);
    }

    #[tokio::test]
    async fn memoized_content_skips_the_engine() {
        let engine = Arc::new(MemoryEngine::new(&[("c1.xhtml", CHAPTER)]));
        let resolver = ChapterResolver::new(engine.clone(), DisplayPolling::default());
        let extractor = ContentExtractor::new(engine.clone());

        let first = extractor
            .chapter_content(&resolver, &NavigationReference::Href("c1.xhtml#a".into()))
            .await
            .unwrap();
        let second = extractor
            .chapter_content(&resolver, &NavigationReference::Href("c1.xhtml".into()))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.load_count(), 1);
    }

    #[tokio::test]
    async fn load_failure_is_unavailable() {
        let engine = Arc::new(MemoryEngine::new(&[("c1.xhtml", CHAPTER)]).with_failing_loads());
        let resolver = ChapterResolver::new(engine.clone(), DisplayPolling::default());
        let extractor = ContentExtractor::new(engine);
        let content = extractor
            .chapter_content(&resolver, &NavigationReference::Href("c1.xhtml".into()))
            .await;
        assert!(content.is_none());
    }
}
