use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use sha2::{Digest as _, Sha256};
use tokio::fs;

use crate::model::{LibraryBookRecord, TranslationCacheEntry, composite_id};

/// Key-value persistence over two logical tables: library books and translations.
/// Each put/get is atomic for a single entry.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn put_book(&self, record: &LibraryBookRecord, blob: &[u8]) -> anyhow::Result<()>;
    async fn update_book(&self, record: &LibraryBookRecord) -> anyhow::Result<()>;
    async fn get_book(&self, book_id: &str) -> anyhow::Result<Option<LibraryBookRecord>>;
    async fn get_book_blob(&self, book_id: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn list_books(&self) -> anyhow::Result<Vec<LibraryBookRecord>>;

    async fn get_translation(
        &self,
        book_id: &str,
        cache_key: &str,
    ) -> anyhow::Result<Option<TranslationCacheEntry>>;
    async fn put_translation(&self, entry: &TranslationCacheEntry) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsLibraryStore {
    base_dir: PathBuf,
}

impl LocalFsLibraryStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn books_dir(&self) -> PathBuf {
        self.base_dir.join("books")
    }

    /// Book ids name directories, so only the ids [`Library`] mints are accepted.
    ///
    /// [`Library`]: crate::library::Library
    fn book_dir(&self, book_id: &str) -> anyhow::Result<PathBuf> {
        anyhow::ensure!(is_book_id(book_id), "invalid library book id: {book_id:?}");
        Ok(self.books_dir().join(book_id))
    }

    fn record_json_path(&self, book_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.book_dir(book_id)?.join("record.json"))
    }

    fn blob_path(&self, book_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.book_dir(book_id)?.join("book.epub"))
    }

    /// Composite ids contain `/` and `::`, so entries are stored under a digest.
    fn translation_path(&self, book_id: &str, cache_key: &str) -> PathBuf {
        let digest = Sha256::digest(composite_id(book_id, cache_key).as_bytes());
        self.base_dir
            .join("translations")
            .join(format!("{}.json", hex::encode(digest)))
    }
}

#[async_trait]
impl LibraryStore for LocalFsLibraryStore {
    async fn put_book(&self, record: &LibraryBookRecord, blob: &[u8]) -> anyhow::Result<()> {
        let dir = self.book_dir(&record.id)?;
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create book dir: {}", dir.display()))?;

        write_bytes_atomic(&self.blob_path(&record.id)?, blob)
            .await
            .context("write book.epub")?;
        write_json_atomic(&self.record_json_path(&record.id)?, record)
            .await
            .context("write record.json")?;
        Ok(())
    }

    async fn update_book(&self, record: &LibraryBookRecord) -> anyhow::Result<()> {
        let path = self.record_json_path(&record.id)?;
        if fs::metadata(&path).await.is_err() {
            anyhow::bail!("unknown library book: {}", record.id);
        }
        write_json_atomic(&path, record)
            .await
            .context("write record.json")
    }

    async fn get_book(&self, book_id: &str) -> anyhow::Result<Option<LibraryBookRecord>> {
        let path = self.record_json_path(book_id)?;
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn get_book_blob(&self, book_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.blob_path(book_id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
        }
    }

    async fn list_books(&self) -> anyhow::Result<Vec<LibraryBookRecord>> {
        let dir = self.books_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir: {}", dir.display()));
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("read dir: {}", dir.display()))?
        {
            let path = entry.path().join("record.json");
            match read_json::<LibraryBookRecord>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), ?err, "skipping unreadable book record");
                }
            }
        }
        Ok(records)
    }

    async fn get_translation(
        &self,
        book_id: &str,
        cache_key: &str,
    ) -> anyhow::Result<Option<TranslationCacheEntry>> {
        let path = self.translation_path(book_id, cache_key);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn put_translation(&self, entry: &TranslationCacheEntry) -> anyhow::Result<()> {
        write_json_atomic(&self.translation_path(&entry.book_id, &entry.cache_key), entry)
            .await
            .context("write translation entry")
    }
}

/// Hyphen-less lowercase UUID, as produced by `Uuid::simple`.
pub fn is_book_id(id: &str) -> bool {
    uuid::Uuid::try_parse(id).is_ok_and(|uuid| uuid.simple().to_string() == id)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

pub(crate) async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    write_bytes_atomic(path, &data).await
}

async fn write_bytes_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
