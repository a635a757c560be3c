use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use bitext::cli::{Cli, Command, ConfigCommand, LibraryCommand};
use bitext::commands;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bitext::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");
    let data_dir = cli.data_dir.as_path();

    match cli.command {
        Command::Chapters(args) => {
            commands::chapters(data_dir, args).await.context("chapters")?;
        }
        Command::Translate(args) => {
            commands::translate(data_dir, args).await.context("translate")?;
        }
        Command::Library {
            command: LibraryCommand::Add(args),
        } => {
            commands::library_add(data_dir, args)
                .await
                .context("library add")?;
        }
        Command::Library {
            command: LibraryCommand::List,
        } => {
            commands::library_list(data_dir).await.context("library list")?;
        }
        Command::Config {
            command: ConfigCommand::Show,
        } => {
            commands::config_show(data_dir).await.context("config show")?;
        }
        Command::Config {
            command: ConfigCommand::Set(args),
        } => {
            commands::config_set(data_dir, args).await.context("config set")?;
        }
        Command::Languages => commands::languages(),
    }

    Ok(())
}
