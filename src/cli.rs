use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::Provider;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding settings and the local library.
    #[arg(long, global = true, default_value = "bitext-data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the flattened table of contents.
    Chapters(ChaptersArgs),
    /// Translate a chapter (and prefetch the next one).
    Translate(TranslateArgs),
    Library {
        #[command(subcommand)]
        command: LibraryCommand,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// List supported target languages.
    Languages,
}

#[derive(Debug, Args)]
pub struct ChaptersArgs {
    /// EPUB file path or library book id.
    pub book: String,
}

#[derive(Debug, Args)]
pub struct TranslateArgs {
    /// EPUB file path or library book id.
    pub book: String,

    /// Chapter href or TOC label (default: where the book opens).
    #[arg(long)]
    pub chapter: Option<String>,

    /// Target language code (overrides settings).
    #[arg(long)]
    pub language: Option<String>,

    /// Model name (overrides settings).
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Chat-completions endpoint for the custom provider.
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Print rows as JSON lines.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum LibraryCommand {
    /// Copy an EPUB into the library.
    Add(LibraryAddArgs),
    /// List library books, newest first.
    List,
}

#[derive(Debug, Args)]
pub struct LibraryAddArgs {
    pub file: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print saved settings (API key masked).
    Show,
    /// Update saved settings.
    Set(ConfigSetArgs),
}

#[derive(Debug, Args)]
pub struct ConfigSetArgs {
    #[arg(long)]
    pub language: Option<String>,

    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    #[arg(long)]
    pub endpoint: Option<String>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub api_key: Option<String>,
}
