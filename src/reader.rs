//! Event façade the host drives: book opened, relocated, viewport scrolled,
//! translate requested, TOC/offset navigation, book closed.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::cache::{TranslationCache, TranslationCacheKey};
use crate::engine::{Location, RenderingEngine};
use crate::epub::EpubBook;
use crate::extract::ContentExtractor;
use crate::library::Library;
use crate::openai::Translator;
use crate::orchestrator::{BatchContext, BatchMode, BatchReport, Orchestrator};
use crate::parallel::ScrollMetrics;
use crate::reference::NavigationReference;
use crate::resolver::{ChapterIndexEntry, ChapterResolver, ChapterUnavailable, DisplayPolling};
use crate::session::ReaderSession;
use crate::settings::Settings;

pub const CHARS_PER_LOCATION: usize = 1600;

/// A loaded book and its per-book caches. Replaced wholesale on every open.
pub struct OpenBook {
    pub engine: Arc<dyn RenderingEngine>,
    pub resolver: ChapterResolver,
    pub extractor: ContentExtractor,
    /// Set for books opened from the library; enables the persistent cache tier.
    pub library_id: Option<String>,
    pub title: String,
}

pub struct Reader {
    settings: RwLock<Settings>,
    library: Option<Library>,
    orchestrator: Orchestrator,
    book: RwLock<Option<Arc<OpenBook>>>,
    session: Mutex<ReaderSession>,
    polling: DisplayPolling,
}

impl Reader {
    pub fn new(settings: Settings, translator: Arc<dyn Translator>, library: Option<Library>) -> Self {
        let cache = TranslationCache::new(library.as_ref().map(Library::store));
        Self {
            settings: RwLock::new(settings),
            library,
            orchestrator: Orchestrator::new(translator, cache),
            book: RwLock::new(None),
            session: Mutex::new(ReaderSession::default()),
            polling: DisplayPolling::default(),
        }
    }

    pub fn with_display_polling(mut self, polling: DisplayPolling) -> Self {
        self.polling = polling;
        self
    }

    pub fn library(&self) -> Option<&Library> {
        self.library.as_ref()
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, settings: Settings) {
        *self.settings.write().await = settings;
    }

    pub async fn book(&self) -> Option<Arc<OpenBook>> {
        self.book.read().await.clone()
    }

    /// Copy of the session state, for rendering.
    pub async fn snapshot(&self) -> ReaderSession {
        self.session.lock().await.clone()
    }

    pub async fn chapter_index(&self) -> Vec<ChapterIndexEntry> {
        match self.book().await {
            Some(book) => book.resolver.index().to_vec(),
            None => Vec::new(),
        }
    }

    /// Replaces any open book. The host is expected to report the first
    /// relocation through [`Reader::on_relocated`].
    pub async fn open_book(
        &self,
        engine: Arc<dyn RenderingEngine>,
        library_id: Option<String>,
        restore_cfi: Option<&str>,
    ) -> anyhow::Result<Arc<OpenBook>> {
        self.close_book().await;

        engine.display(None).await.context("display book")?;
        let title = engine
            .metadata()
            .title
            .unwrap_or_else(|| "Untitled".to_owned());
        let resolver = ChapterResolver::new(Arc::clone(&engine), self.polling);
        let extractor = ContentExtractor::new(Arc::clone(&engine));

        match engine.generate_locations(CHARS_PER_LOCATION).await {
            Ok(()) => self.session.lock().await.locations_ready = true,
            Err(err) => tracing::warn!(?err, "unable to build book locations"),
        }

        if let Some(cfi) = restore_cfi
            && let Err(err) = engine.display(Some(cfi)).await
        {
            tracing::warn!(cfi, ?err, "unable to restore last location");
        }

        let book = Arc::new(OpenBook {
            engine,
            resolver,
            extractor,
            library_id,
            title,
        });
        tracing::info!(
            title = %book.title,
            library_id = book.library_id.as_deref(),
            chapters = book.resolver.index().len(),
            "book opened"
        );
        *self.book.write().await = Some(Arc::clone(&book));
        Ok(book)
    }

    /// Opens an EPUB file, optionally adding it to the library first.
    pub async fn open_epub_file(
        &self,
        path: &Path,
        add_to_library: bool,
    ) -> anyhow::Result<Arc<OpenBook>> {
        let (epub, bytes) = EpubBook::open(path).await?;
        let library_id = match (&self.library, add_to_library) {
            (Some(library), true) => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "book.epub".to_owned());
                let record = library
                    .add_book(&bytes, &epub.metadata(), &file_name)
                    .await?;
                Some(record.id)
            }
            (None, true) => anyhow::bail!("no library is configured"),
            _ => None,
        };
        self.open_book(Arc::new(epub), library_id, None).await
    }

    /// Opens a library book at its last saved position.
    pub async fn open_library_book(&self, book_id: &str) -> anyhow::Result<Arc<OpenBook>> {
        let library = self
            .library
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no library is configured"))?;
        let (record, blob) = library.load(book_id).await?;
        let epub = EpubBook::from_bytes(&blob)
            .with_context(|| format!("parse library book: {}", record.file_name))?;
        self.open_book(
            Arc::new(epub),
            Some(record.id.clone()),
            record.last_cfi.as_deref(),
        )
        .await
    }

    pub async fn close_book(&self) {
        self.orchestrator.cancel();
        if let Some(book) = self.book.write().await.take() {
            tracing::info!(title = %book.title, "book closed");
        }
        self.session.lock().await.reset();
    }

    /// Updates position and progress, shows any cached translation, and with
    /// auto-translate enabled starts a background cycle whose handle is returned.
    pub async fn on_relocated(self: &Arc<Self>, location: Location) -> Option<JoinHandle<BatchReport>> {
        let book = self.book().await?;
        let href = location.start_href.filter(|href| !href.trim().is_empty());
        if let Some(href) = &href {
            self.session.lock().await.current_href = Some(href.clone());
        }

        let cfi = location.start_cfi?;
        if !self.session.lock().await.locations_ready {
            return None;
        }

        let percent = book
            .engine
            .percentage_from_cfi(&cfi)
            .map(|fraction| (fraction * 100.0).round().clamp(0.0, 100.0) as u32)
            .unwrap_or(0);
        let chapter_reference = match &href {
            Some(href) => NavigationReference::Href(href.clone()),
            None => NavigationReference::Cfi(cfi.clone()),
        };
        let chapter_id = book.resolver.identify(&chapter_reference);
        {
            let mut session = self.session.lock().await;
            session.parallel.hide();
            session.update_progress(percent);
            session.current_chapter_id = chapter_id;
        }

        if let (Some(library), Some(book_id)) = (&self.library, &book.library_id)
            && let Err(err) = library
                .update_progress(book_id, Some(&cfi), Some(percent))
                .await
        {
            tracing::warn!(book_id = %book_id, ?err, "unable to save reading progress");
        }

        self.show_cached_translation().await;

        if !self.session.lock().await.auto_translate {
            return None;
        }
        let reader = Arc::clone(self);
        Some(tokio::spawn(async move {
            reader.run_batch(BatchMode::Automatic).await
        }))
    }

    /// Raw scroll tick inside the original content. Returns the scroll percent
    /// the parallel pane now follows.
    pub async fn on_viewport_scroll(&self, metrics: ScrollMetrics) -> f64 {
        let percent = metrics.percent();
        self.session.lock().await.parallel.sync_scroll(percent);
        percent
    }

    /// Explicit translation request. Enables auto-translate for later relocations.
    pub async fn translate_current_view(&self) -> BatchReport {
        self.run_batch(BatchMode::UserTriggered).await
    }

    async fn run_batch(&self, mode: BatchMode) -> BatchReport {
        let book = self.book().await;
        let settings = self.settings().await;
        let current = match &book {
            Some(book) => current_reference(book, &*self.session.lock().await),
            None => None,
        };
        let ctx = BatchContext {
            book,
            settings,
            current,
        };
        self.orchestrator.run_batch(ctx, &self.session, mode).await
    }

    /// Moves to a TOC entry, then refreshes the cached-translation view even
    /// when the entry could not be displayed.
    pub async fn navigate_to_entry(
        &self,
        entry: &ChapterIndexEntry,
    ) -> Result<String, ChapterUnavailable> {
        let Some(book) = self.book().await else {
            return Err(ChapterUnavailable {
                target: entry.href.clone(),
                attempts: 0,
            });
        };
        {
            let mut session = self.session.lock().await;
            session.current_href = Some(entry.href.clone());
            session.current_chapter_id = Some(entry.id.clone());
        }
        let shown = book
            .resolver
            .display_chapter(&entry.href, Some(&entry.original_href))
            .await;
        self.show_cached_translation().await;
        shown
    }

    /// Looks a chapter up by href or label and moves to it.
    pub async fn navigate_to(&self, query: &str) -> anyhow::Result<String> {
        let book = self
            .book()
            .await
            .ok_or_else(|| anyhow::anyhow!("no book is open"))?;
        let entry = book
            .resolver
            .find_entry(query)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no chapter matches {query:?}"))?;
        Ok(self.navigate_to_entry(&entry).await?)
    }

    /// `None` when the move would not change chapters.
    pub async fn navigate_chapter_offset(
        &self,
        offset: isize,
    ) -> Option<Result<String, ChapterUnavailable>> {
        let book = self.book().await?;
        let current = current_reference(&book, &*self.session.lock().await);
        let entry = book.resolver.offset_entry(current.as_ref(), offset)?.clone();
        Some(self.navigate_to_entry(&entry).await)
    }

    /// Jumps to a whole-book position, in percent.
    pub async fn seek(&self, percent: f64) -> anyhow::Result<Location> {
        let book = self
            .book()
            .await
            .ok_or_else(|| anyhow::anyhow!("no book is open"))?;
        if !self.session.lock().await.locations_ready {
            anyhow::bail!("book locations are not ready");
        }
        let cfi = book
            .engine
            .cfi_from_percentage(percent.clamp(0.0, 100.0) / 100.0)
            .ok_or_else(|| anyhow::anyhow!("no location at {percent}%"))?;
        book.engine
            .display(Some(&cfi))
            .await
            .with_context(|| format!("display {cfi}"))?;
        book.engine
            .current_location()
            .ok_or_else(|| anyhow::anyhow!("engine reported no location after seeking"))
    }

    /// Renders the cached translation for the current chapter, or hides the
    /// parallel view. Never touches the network.
    pub async fn show_cached_translation(&self) {
        let Some(book) = self.book().await else {
            self.session.lock().await.parallel.hide();
            return;
        };
        let current = current_reference(&book, &*self.session.lock().await);
        let content = match &current {
            Some(reference) => book.extractor.chapter_content(&book.resolver, reference).await,
            None => None,
        };
        let chapter_id = current
            .as_ref()
            .and_then(|reference| book.resolver.identify(reference));

        let settings = self.settings().await;
        let key = TranslationCacheKey::new(
            chapter_id,
            &settings.target_language,
            settings.provider.as_str(),
            settings.effective_model(),
        );
        let cached = self
            .orchestrator
            .cache()
            .read(book.library_id.as_deref(), &key)
            .await;

        let mut session = self.session.lock().await;
        session.last_original_paragraphs = content
            .map(|content| content.paragraphs.clone())
            .unwrap_or_default();
        match cached {
            Some(text) => {
                let originals = session.last_original_paragraphs.clone();
                session.show_translation(&originals, &text);
            }
            None => session.parallel.hide(),
        }
    }
}

/// Remembered chapter identity, then the engine's current location, then the
/// last relocated href.
fn current_reference(book: &OpenBook, session: &ReaderSession) -> Option<NavigationReference> {
    session
        .current_chapter_id
        .clone()
        .map(NavigationReference::ChapterId)
        .or_else(|| {
            book.engine
                .current_location()
                .and_then(|location| location.start_cfi)
                .map(NavigationReference::Cfi)
        })
        .or_else(|| session.current_href.clone().map(NavigationReference::Href))
}
