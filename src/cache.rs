//! Two-tier translation cache: an in-process session map in front of the library store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::model::{TranslationCacheEntry, composite_id};
use crate::reference::ChapterIdentity;
use crate::store::LibraryStore;

/// Session-tier book key for books opened outside the library.
pub const SESSION_BOOK_KEY: &str = "session";
const PAGE_CHAPTER_KEY: &str = "page";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranslationCacheKey {
    pub chapter: Option<ChapterIdentity>,
    pub language: String,
    pub provider: String,
    pub model: String,
}

impl TranslationCacheKey {
    pub fn new(
        chapter: Option<ChapterIdentity>,
        language: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            chapter,
            language: language.into(),
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for TranslationCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chapter = self
            .chapter
            .as_ref()
            .map(ChapterIdentity::as_str)
            .unwrap_or(PAGE_CHAPTER_KEY);
        write!(
            f,
            "{chapter}::{}::{}::{}",
            self.language, self.provider, self.model
        )
    }
}

pub struct TranslationCache {
    session: Mutex<HashMap<String, String>>,
    store: Option<Arc<dyn LibraryStore>>,
}

impl TranslationCache {
    pub fn new(store: Option<Arc<dyn LibraryStore>>) -> Self {
        Self {
            session: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Session tier first; the store is consulted only for library books, and a
    /// store hit is copied into the session tier.
    pub async fn read(&self, book_id: Option<&str>, key: &TranslationCacheKey) -> Option<String> {
        let cache_key = key.to_string();
        let session_key = session_key(book_id, &cache_key);
        if let Some(text) = self.session.lock().await.get(&session_key) {
            return Some(text.clone());
        }

        let (Some(book_id), Some(store)) = (book_id, &self.store) else {
            return None;
        };
        match store.get_translation(book_id, &cache_key).await {
            Ok(Some(entry)) => {
                tracing::debug!(cache_key, book_id, "translation loaded from library store");
                self.session
                    .lock()
                    .await
                    .insert(session_key, entry.text.clone());
                Some(entry.text)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(cache_key, book_id, ?err, "translation cache read failed");
                None
            }
        }
    }

    /// Always updates the session tier; library books are also persisted.
    pub async fn write(&self, book_id: Option<&str>, key: &TranslationCacheKey, text: &str) {
        let cache_key = key.to_string();
        self.session
            .lock()
            .await
            .insert(session_key(book_id, &cache_key), text.to_owned());

        if let (Some(book_id), Some(store)) = (book_id, &self.store) {
            let entry = TranslationCacheEntry::new(book_id, &cache_key, text);
            if let Err(err) = store.put_translation(&entry).await {
                tracing::warn!(cache_key, book_id, ?err, "translation cache write failed");
            }
        }
    }
}

fn session_key(book_id: Option<&str>, cache_key: &str) -> String {
    composite_id(book_id.unwrap_or(SESSION_BOOK_KEY), cache_key)
}
