use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;

use crate::engine::BookMetadata;
use crate::model::{LibraryBookRecord, LibraryBookSummary};
use crate::store::LibraryStore;

const UNKNOWN_AUTHOR: &str = "Unknown author";

#[derive(Clone)]
pub struct Library {
    store: Arc<dyn LibraryStore>,
}

impl Library {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn LibraryStore> {
        Arc::clone(&self.store)
    }

    /// Stores a copy of the book. Title and author fall back to the file name and
    /// "Unknown author".
    pub async fn add_book(
        &self,
        bytes: &[u8],
        metadata: &BookMetadata,
        file_name: &str,
    ) -> anyhow::Result<LibraryBookRecord> {
        let record = LibraryBookRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            title: non_blank(metadata.title.as_deref())
                .unwrap_or_else(|| strip_epub_extension(file_name))
                .to_owned(),
            author: non_blank(metadata.creator.as_deref())
                .unwrap_or(UNKNOWN_AUTHOR)
                .to_owned(),
            file_name: file_name.to_owned(),
            added_at: Utc::now(),
            last_progress: 0,
            last_cfi: None,
        };
        self.store
            .put_book(&record, bytes)
            .await
            .with_context(|| format!("save book to library: {file_name}"))?;
        tracing::info!(book_id = %record.id, title = %record.title, "book added to library");
        Ok(record)
    }

    /// Newest first.
    pub async fn list(&self) -> anyhow::Result<Vec<LibraryBookSummary>> {
        let mut records = self.store.list_books().await.context("list library")?;
        records.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(records.iter().map(LibraryBookSummary::from).collect())
    }

    pub async fn get(&self, book_id: &str) -> anyhow::Result<Option<LibraryBookRecord>> {
        self.store.get_book(book_id).await
    }

    /// The record together with its EPUB bytes.
    pub async fn load(&self, book_id: &str) -> anyhow::Result<(LibraryBookRecord, Vec<u8>)> {
        let record = self
            .store
            .get_book(book_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no library book with id {book_id}"))?;
        let blob = self
            .store
            .get_book_blob(book_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("library book {book_id} has no stored file"))?;
        Ok((record, blob))
    }

    /// Unknown ids are ignored.
    pub async fn update_progress(
        &self,
        book_id: &str,
        cfi: Option<&str>,
        percent: Option<u32>,
    ) -> anyhow::Result<()> {
        let Some(mut record) = self.store.get_book(book_id).await? else {
            return Ok(());
        };
        if let Some(cfi) = cfi {
            record.last_cfi = Some(cfi.to_owned());
        }
        if let Some(percent) = percent {
            record.last_progress = percent.min(100);
        }
        self.store.update_book(&record).await
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn strip_epub_extension(file_name: &str) -> &str {
    let len = file_name.len();
    if len > 5
        && file_name.is_char_boundary(len - 5)
        && file_name[len - 5..].eq_ignore_ascii_case(".epub")
    {
        return &file_name[..len - 5];
    }
    file_name
}
