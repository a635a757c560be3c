//! Current-chapter translation with next-chapter prefetch.
//!
//! Every cycle owns one cancellation token. Starting a cycle cancels the previous
//! token, so at most one set of requests is in flight and a superseded result is
//! never rendered or cached.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::cache::{TranslationCache, TranslationCacheKey};
use crate::openai::{TranslateError, TranslationRequest, Translator};
use crate::reader::OpenBook;
use crate::reference::NavigationReference;
use crate::resolver::Direction;
use crate::session::{ReaderSession, StatusLine};
use crate::settings::Settings;

/// Input problems the user has to fix. The messages double as status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Open a book to translate.")]
    NoBook,
    #[error("Enter your API key to translate.")]
    MissingApiKey,
    #[error("Enter an API endpoint for the custom provider.")]
    MissingEndpoint,
    #[error("Navigate to a chapter before translating.")]
    NoChapter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Explicit request: announces status and enables auto-translate.
    UserTriggered,
    /// Relocation-driven background cycle: silent.
    Automatic,
}

impl BatchMode {
    fn announces(self) -> bool {
        matches!(self, Self::UserTriggered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterOutcome {
    Translated,
    CacheHit,
    /// No chapter identity could be derived from the reference.
    Unresolved,
    /// The chapter has no readable text.
    NoText,
    Failed,
    Cancelled,
}

impl ChapterOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Translated | Self::CacheHit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReport {
    Rejected(ValidationError),
    Settled {
        current: ChapterOutcome,
        next: Option<ChapterOutcome>,
    },
}

impl BatchReport {
    pub fn current(&self) -> Option<ChapterOutcome> {
        match self {
            Self::Rejected(_) => None,
            Self::Settled { current, .. } => Some(*current),
        }
    }
}

/// Everything a cycle needs, captured when it starts.
pub struct BatchContext {
    pub book: Option<Arc<OpenBook>>,
    pub settings: Settings,
    pub current: Option<NavigationReference>,
}

struct Job<'a> {
    book: &'a OpenBook,
    language: &'a str,
    provider: &'a str,
    provider_label: &'a str,
    /// Failures of the displayed chapter reach the status line.
    reports_errors: bool,
    request: TranslationRequest,
}

/// Bookkeeping for the `translating` flag and the announcement it comes with.
#[derive(Debug, Default)]
struct Announcements {
    /// Bumped by every user-triggered cycle.
    generation: u64,
    /// Status shown before the oldest still-running announcement.
    resting: StatusLine,
}

/// A user-triggered cycle's claim on the status line.
struct UserCycle {
    generation: u64,
    announcement: String,
}

pub struct Orchestrator {
    translator: Arc<dyn Translator>,
    cache: TranslationCache,
    in_flight: std::sync::Mutex<Option<CancellationToken>>,
    announcements: std::sync::Mutex<Announcements>,
}

impl Orchestrator {
    pub fn new(translator: Arc<dyn Translator>, cache: TranslationCache) -> Self {
        Self {
            translator,
            cache,
            in_flight: std::sync::Mutex::new(None),
            announcements: std::sync::Mutex::new(Announcements::default()),
        }
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Cancels the in-flight cycle, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.swap_token(None) {
            token.cancel();
        }
    }

    fn start_cycle(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.swap_token(Some(token.clone())) {
            previous.cancel();
        }
        token
    }

    fn swap_token(&self, next: Option<CancellationToken>) -> Option<CancellationToken> {
        std::mem::replace(&mut *lock_unpoisoned(&self.in_flight), next)
    }

    /// Sets the `translating` flag and the announcement. Called with the session
    /// locked, in the same critical section that starts the cycle.
    fn announce(&self, session: &mut ReaderSession, announcement: String) -> UserCycle {
        let mut announcements = lock_unpoisoned(&self.announcements);
        announcements.generation += 1;
        if !session.translating {
            announcements.resting = session.status.clone();
        }
        session.auto_translate = true;
        session.translating = true;
        session.set_status(announcement.clone());
        UserCycle {
            generation: announcements.generation,
            announcement,
        }
    }

    /// Clears the flag unless a newer user-triggered cycle owns it. A cancelled
    /// cycle that still owns the status line puts back what was shown before.
    fn retire(&self, session: &mut ReaderSession, cycle: &UserCycle, cancelled: bool) {
        let announcements = lock_unpoisoned(&self.announcements);
        if announcements.generation != cycle.generation {
            return;
        }
        session.translating = false;
        if cancelled && !session.status.is_error && session.status.message == cycle.announcement {
            session.status = announcements.resting.clone();
        }
    }

    pub async fn run_batch(
        &self,
        ctx: BatchContext,
        session: &Mutex<ReaderSession>,
        mode: BatchMode,
    ) -> BatchReport {
        let (book, current, endpoint) = match validate(&ctx) {
            Ok(valid) => valid,
            Err(reason) => {
                tracing::debug!(?mode, %reason, "translation batch rejected");
                if mode.announces() {
                    session.lock().await.set_error(reason.to_string());
                }
                return BatchReport::Rejected(reason);
            }
        };

        let settings = &ctx.settings;
        let next = book
            .resolver
            .adjacent(&current, Direction::Next)
            .map(|section| NavigationReference::Href(section.href));
        let provider_label = settings.provider.label();
        let model = settings.effective_model().to_owned();
        let batch_label = if next.is_some() {
            "current and next chapters"
        } else {
            "current chapter"
        };

        let (token, user_cycle) = {
            let mut guard = session.lock().await;
            let token = self.start_cycle();
            let user_cycle = mode.announces().then(|| {
                self.announce(
                    &mut guard,
                    format!("Translating {batch_label} via {provider_label}..."),
                )
            });
            (token, user_cycle)
        };

        let job = Job {
            book,
            language: &settings.target_language,
            provider: settings.provider.as_str(),
            provider_label,
            reports_errors: mode.announces(),
            request: TranslationRequest {
                text: String::new(),
                language_label: settings.language_label().to_owned(),
                model: model.clone(),
                endpoint: endpoint.to_owned(),
                api_key: settings.api_key.trim().to_owned(),
            },
        };

        tracing::info!(
            current = %current,
            next = ?next,
            %model,
            provider = job.provider,
            "translation batch started"
        );

        let (current_outcome, next_outcome) = tokio::join!(
            self.translate_chapter(&job, &current, true, &token, session),
            async {
                match &next {
                    Some(next) => Some(self.translate_chapter(&job, next, false, &token, session).await),
                    None => None,
                }
            }
        );

        if let Some(cycle) = &user_cycle {
            let mut guard = session.lock().await;
            let cancelled = token.is_cancelled();
            self.retire(&mut guard, cycle, cancelled);
            if !cancelled && current_outcome.is_success() {
                let mut message = if current_outcome == ChapterOutcome::CacheHit {
                    format!("Loaded cached translation via {provider_label}.")
                } else {
                    format!(
                        "Translated to {} via {provider_label} ({model}).",
                        job.request.language_label
                    )
                };
                if next_outcome.is_some_and(ChapterOutcome::is_success) {
                    message.push_str(" Prefetched the next chapter in parallel.");
                }
                guard.set_status(message);
            }
        }

        tracing::info!(current = ?current_outcome, next = ?next_outcome, "translation batch settled");
        BatchReport::Settled {
            current: current_outcome,
            next: next_outcome,
        }
    }

    /// Cache first, then one remote call. `show` renders the result; otherwise the
    /// chapter is only cached. Nothing reaches the session once `cancel` fires.
    async fn translate_chapter(
        &self,
        job: &Job<'_>,
        target: &NavigationReference,
        show: bool,
        cancel: &CancellationToken,
        session: &Mutex<ReaderSession>,
    ) -> ChapterOutcome {
        let book = job.book;
        let reports_errors = show && job.reports_errors;
        let Some(chapter_id) = book.resolver.identify(target) else {
            if reports_errors && let Some(mut guard) = live_session(session, cancel).await {
                guard.set_error("Unable to determine the current chapter for translation.");
            }
            return ChapterOutcome::Unresolved;
        };

        let Some(content) = book.extractor.chapter_content(&book.resolver, target).await else {
            if reports_errors && let Some(mut guard) = live_session(session, cancel).await {
                guard.set_error("Unable to read text from this chapter for translation.");
            } else {
                tracing::debug!(chapter_id = %chapter_id, show, "no readable text");
            }
            return ChapterOutcome::NoText;
        };

        if show && let Some(mut guard) = live_session(session, cancel).await {
            guard.last_original_paragraphs = content.paragraphs.clone();
        }

        let key = TranslationCacheKey::new(
            Some(chapter_id.clone()),
            job.language,
            job.provider,
            &job.request.model,
        );
        let library_id = book.library_id.as_deref();
        if let Some(cached) = self.cache.read(library_id, &key).await {
            tracing::debug!(cache_key = %key, show, "translation cache hit");
            if show {
                let Some(mut guard) = live_session(session, cancel).await else {
                    tracing::debug!(chapter_id = %chapter_id, "discarding superseded cache hit");
                    return ChapterOutcome::Cancelled;
                };
                guard.show_translation(&content.paragraphs, &cached);
            }
            return ChapterOutcome::CacheHit;
        }

        let request = TranslationRequest {
            text: content.text.clone(),
            ..job.request.clone()
        };
        match self.translator.translate(&request, cancel).await {
            Ok(translated) => {
                let mut guard = session.lock().await;
                if cancel.is_cancelled() {
                    tracing::debug!(chapter_id = %chapter_id, "discarding superseded translation");
                    return ChapterOutcome::Cancelled;
                }
                if show {
                    guard.show_translation(&content.paragraphs, &translated);
                }
                drop(guard);
                self.cache.write(library_id, &key, &translated).await;
                tracing::info!(
                    chapter_id = %chapter_id,
                    cache_key = %key,
                    prefetch = !show,
                    "chapter translated"
                );
                ChapterOutcome::Translated
            }
            Err(TranslateError::Cancelled) => {
                tracing::debug!(chapter_id = %chapter_id, "translation cancelled");
                ChapterOutcome::Cancelled
            }
            Err(err) => {
                if reports_errors {
                    tracing::error!(
                        chapter_id = %chapter_id,
                        provider = job.provider_label,
                        error = %err,
                        "translation failed"
                    );
                    if let Some(mut guard) = live_session(session, cancel).await {
                        guard.set_error("Translation failed. See logs for details.");
                    }
                } else {
                    tracing::warn!(
                        chapter_id = %chapter_id,
                        show,
                        error = %err,
                        "background translation failed"
                    );
                }
                ChapterOutcome::Failed
            }
        }
    }
}

/// Locks the session for a write, or `None` once the cycle is superseded.
async fn live_session<'s>(
    session: &'s Mutex<ReaderSession>,
    cancel: &CancellationToken,
) -> Option<MutexGuard<'s, ReaderSession>> {
    let guard = session.lock().await;
    (!cancel.is_cancelled()).then_some(guard)
}

fn lock_unpoisoned<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn validate(ctx: &BatchContext) -> Result<(&OpenBook, NavigationReference, &str), ValidationError> {
    let book = ctx.book.as_deref().ok_or(ValidationError::NoBook)?;
    if ctx.settings.api_key.trim().is_empty() {
        return Err(ValidationError::MissingApiKey);
    }
    let endpoint = ctx
        .settings
        .endpoint()
        .ok_or(ValidationError::MissingEndpoint)?;
    let current = ctx.current.clone().ok_or(ValidationError::NoChapter)?;
    Ok((book, current, endpoint))
}
