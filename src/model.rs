use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A book in the local library. The EPUB bytes live next to the record in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryBookRecord {
    pub id: String,
    pub title: String,
    pub author: String,
    pub file_name: String,
    pub added_at: DateTime<Utc>,

    /// Reading position in percent, `0..=100`.
    #[serde(default)]
    pub last_progress: u32,
    #[serde(default)]
    pub last_cfi: Option<String>,
}

/// Listing view of a library record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryBookSummary {
    pub id: String,
    pub title: String,
    pub author: String,
    pub file_name: String,
    pub added_at: DateTime<Utc>,
    pub last_progress: u32,
}

impl From<&LibraryBookRecord> for LibraryBookSummary {
    fn from(record: &LibraryBookRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            author: record.author.clone(),
            file_name: record.file_name.clone(),
            added_at: record.added_at,
            last_progress: record.last_progress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationCacheEntry {
    /// `<book_id>::<cache_key>`
    pub id: String,
    pub book_id: String,
    pub cache_key: String,
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

impl TranslationCacheEntry {
    pub fn new(book_id: &str, cache_key: &str, text: impl Into<String>) -> Self {
        Self {
            id: composite_id(book_id, cache_key),
            book_id: book_id.to_owned(),
            cache_key: cache_key.to_owned(),
            text: text.into(),
            updated_at: Utc::now(),
        }
    }
}

pub fn composite_id(book_id: &str, cache_key: &str) -> String {
    format!("{book_id}::{cache_key}")
}
