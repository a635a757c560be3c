use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::engine::{BookMetadata, Location, RenderingEngine, SpineSection, TocItem};
use crate::reference::{is_cfi, strip_fragment};

/// In-memory engine for unit tests. Spine hrefs resolve exactly or by path suffix.
pub(crate) struct MemoryEngine {
    spine: Vec<(String, String)>,
    toc: Vec<TocItem>,
    displayable: Option<Vec<String>>,
    fail_loads: bool,
    pub displayed: Mutex<Vec<String>>,
    pub loads: AtomicUsize,
    current: Mutex<Option<usize>>,
}

impl MemoryEngine {
    pub fn new(spine: &[(&str, &str)]) -> Self {
        Self {
            spine: spine
                .iter()
                .map(|(href, markup)| ((*href).to_owned(), (*markup).to_owned()))
                .collect(),
            toc: Vec::new(),
            displayable: None,
            fail_loads: false,
            displayed: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            current: Mutex::new(None),
        }
    }

    pub fn with_toc(mut self, toc: Vec<TocItem>) -> Self {
        self.toc = toc;
        self
    }

    /// Only these exact targets can be displayed.
    pub fn with_displayable(mut self, targets: &[&str]) -> Self {
        self.displayable = Some(targets.iter().map(|t| (*t).to_owned()).collect());
        self
    }

    pub fn with_failing_loads(mut self) -> Self {
        self.fail_loads = true;
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn displayed(&self) -> Vec<String> {
        self.displayed.lock().unwrap().clone()
    }
}

pub(crate) fn toc(href: &str, label: &str, subitems: Vec<TocItem>) -> TocItem {
    TocItem {
        href: href.to_owned(),
        label: label.to_owned(),
        subitems,
    }
}

pub(crate) fn cfi_for(index: usize) -> String {
    format!("epubcfi(/6/{}!/4/2)", (index + 1) * 2)
}

#[async_trait]
impl RenderingEngine for MemoryEngine {
    fn metadata(&self) -> BookMetadata {
        BookMetadata {
            title: Some("Memory Book".to_owned()),
            creator: Some("Test Author".to_owned()),
        }
    }

    fn toc(&self) -> Vec<TocItem> {
        self.toc.clone()
    }

    fn spine_get(&self, reference: &str) -> Option<SpineSection> {
        if is_cfi(reference) {
            let step = reference
                .trim_start_matches("epubcfi(/6/")
                .split(|c: char| !c.is_ascii_digit())
                .next()?
                .parse::<usize>()
                .ok()?;
            return self.spine_at((step / 2).checked_sub(1)?);
        }
        let path = strip_fragment(reference);
        self.spine
            .iter()
            .position(|(href, _)| href == path || href.ends_with(&format!("/{path}")))
            .and_then(|index| self.spine_at(index))
    }

    fn spine_at(&self, index: usize) -> Option<SpineSection> {
        self.spine.get(index).map(|(href, _)| SpineSection {
            index,
            href: href.clone(),
            idref: format!("item{index}"),
        })
    }

    async fn load_section(&self, section: &SpineSection) -> anyhow::Result<String> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_loads {
            anyhow::bail!("load failed: {}", section.href);
        }
        self.spine
            .get(section.index)
            .map(|(_, markup)| markup.clone())
            .ok_or_else(|| anyhow::anyhow!("no such section: {}", section.href))
    }

    async fn display(&self, target: Option<&str>) -> anyhow::Result<()> {
        let target = target.unwrap_or_default().to_owned();
        self.displayed.lock().unwrap().push(target.clone());
        if let Some(allowed) = &self.displayable
            && !allowed.contains(&target)
        {
            anyhow::bail!("cannot display {target}");
        }
        let index = if target.is_empty() {
            Some(0)
        } else {
            self.spine_get(&target).map(|section| section.index)
        };
        match index {
            Some(index) => {
                *self.current.lock().unwrap() = Some(index);
                Ok(())
            }
            None => anyhow::bail!("cannot display {target}"),
        }
    }

    fn has_rendered_content(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }

    fn current_location(&self) -> Option<Location> {
        let index = (*self.current.lock().unwrap())?;
        Some(Location {
            start_href: Some(self.spine[index].0.clone()),
            start_cfi: Some(cfi_for(index)),
        })
    }

    async fn generate_locations(&self, _chars_per_location: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn percentage_from_cfi(&self, cfi: &str) -> Option<f64> {
        let section = self.spine_get(cfi)?;
        Some(section.index as f64 / self.spine.len() as f64)
    }

    fn cfi_from_percentage(&self, percentage: f64) -> Option<String> {
        let index = (percentage * self.spine.len() as f64).floor() as usize;
        Some(cfi_for(index.min(self.spine.len().checked_sub(1)?)))
    }
}
