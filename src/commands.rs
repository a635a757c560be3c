//! Handlers behind the CLI subcommands.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::{ChaptersArgs, ConfigSetArgs, LibraryAddArgs, TranslateArgs};
use crate::engine::RenderingEngine as _;
use crate::epub::EpubBook;
use crate::library::Library;
use crate::openai::ChatCompletionsClient;
use crate::orchestrator::BatchReport;
use crate::reader::{OpenBook, Reader};
use crate::settings::{
    LANGUAGES, Provider, Settings, settings_path, validate_endpoint, validate_language,
};
use crate::store::{self, LocalFsLibraryStore};

pub fn library(data_dir: &Path) -> Library {
    Library::new(Arc::new(LocalFsLibraryStore::new(data_dir.join("library"))))
}

async fn load_settings(data_dir: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(&settings_path(data_dir)).await?;
    settings.apply_api_key_env(|name| std::env::var(name).ok());
    Ok(settings)
}

fn reader(data_dir: &Path, settings: Settings) -> Arc<Reader> {
    Arc::new(Reader::new(
        settings,
        Arc::new(ChatCompletionsClient::default()),
        Some(library(data_dir)),
    ))
}

/// `book` is an EPUB path when such a file exists, a library id otherwise.
async fn open(reader: &Reader, book: &str) -> anyhow::Result<Arc<OpenBook>> {
    let path = Path::new(book);
    if path.is_file() {
        reader
            .open_epub_file(path, false)
            .await
            .with_context(|| format!("open epub: {}", path.display()))
    } else if store::is_book_id(book) {
        reader.open_library_book(book).await
    } else {
        anyhow::bail!("not an epub file or library book id: {book}")
    }
}

pub async fn chapters(data_dir: &Path, args: ChaptersArgs) -> anyhow::Result<()> {
    let reader = reader(data_dir, Settings::default());
    let book = open(&reader, &args.book).await?;
    println!("{}", book.title);
    for entry in reader.chapter_index().await {
        let indent = "  ".repeat(entry.depth + 1);
        println!("{indent}{}\t{}", entry.label, entry.id);
    }
    Ok(())
}

pub async fn translate(data_dir: &Path, args: TranslateArgs) -> anyhow::Result<()> {
    let mut settings = load_settings(data_dir).await?;
    if let Some(language) = args.language {
        validate_language(&language)?;
        settings.target_language = language;
    }
    if let Some(model) = args.model {
        settings.model = model;
    }
    if let Some(provider) = args.provider {
        settings.provider = provider;
    }
    if let Some(endpoint) = args.endpoint {
        validate_endpoint(&endpoint)?;
        settings.custom_endpoint = endpoint;
        if args.provider.is_none() {
            settings.provider = Provider::Custom;
        }
    }

    let reader = reader(data_dir, settings);
    let book = open(&reader, &args.book).await?;
    if let Some(chapter) = &args.chapter {
        reader.navigate_to(chapter).await?;
    }
    if let Some(location) = book.engine.current_location()
        && let Some(background) = reader.on_relocated(location).await
    {
        background.await.context("join background translation")?;
    }

    let report = reader.translate_current_view().await;
    let session = reader.snapshot().await;
    match report {
        BatchReport::Rejected(reason) => anyhow::bail!("{reason}"),
        BatchReport::Settled { current, .. } if !current.is_success() => {
            anyhow::bail!("{}", session.status.message)
        }
        BatchReport::Settled { .. } => {}
    }

    for row in session.parallel.rows() {
        if args.json {
            println!("{}", serde_json::to_string(row).context("serialize row")?);
        } else {
            println!("{}\n> {}\n", row.original, row.translated);
        }
    }
    eprintln!("{}", session.status.message);
    Ok(())
}

pub async fn library_add(data_dir: &Path, args: LibraryAddArgs) -> anyhow::Result<()> {
    let (book, bytes) = EpubBook::open(&args.file)
        .await
        .with_context(|| format!("open epub: {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book.epub".to_owned());
    let record = library(data_dir)
        .add_book(&bytes, &book.metadata(), &file_name)
        .await?;
    println!("{}\t{}", record.id, record.title);
    Ok(())
}

pub async fn library_list(data_dir: &Path) -> anyhow::Result<()> {
    for book in library(data_dir).list().await? {
        println!(
            "{}\t{}\t{}\t{}%",
            book.id, book.title, book.author, book.last_progress
        );
    }
    Ok(())
}

pub async fn config_show(data_dir: &Path) -> anyhow::Result<()> {
    let mut settings = load_settings(data_dir).await?;
    if !settings.api_key.is_empty() {
        settings.api_key = "********".to_owned();
    }
    let json = serde_json::to_string_pretty(&settings).context("serialize settings")?;
    println!("{json}");
    Ok(())
}

pub async fn config_set(data_dir: &Path, args: ConfigSetArgs) -> anyhow::Result<()> {
    let path = settings_path(data_dir);
    let mut settings = Settings::load(&path).await?;
    if let Some(language) = args.language {
        validate_language(&language)?;
        settings.target_language = language;
    }
    if let Some(provider) = args.provider {
        settings.provider = provider;
    }
    if let Some(endpoint) = args.endpoint {
        validate_endpoint(&endpoint)?;
        settings.custom_endpoint = endpoint;
    }
    if let Some(model) = args.model {
        settings.model = model;
    }
    if let Some(api_key) = args.api_key {
        settings.api_key = api_key.trim().to_owned();
    }
    settings.save(&path).await?;
    tracing::info!(path = %path.display(), "settings saved");
    Ok(())
}

pub fn languages() {
    for option in LANGUAGES {
        println!("{}\t{}", option.code, option.label);
    }
}
