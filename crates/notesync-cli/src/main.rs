//! NoteSync CLI - Command-line interface for NoteSync
//!
//! Provides commands for:
//! - Creating, editing and removing notes
//! - Organizing notes in folders and the archive
//! - Running a sync and viewing sync status
//! - Inspecting the configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    archive::ArchiveCommand, config::ConfigCommand, folder::FolderCommand, note::NoteCommand,
    status::StatusCommand, sync::SyncCommand, CliContext,
};
use notesync_core::config::Config;
use output::{get_formatter, OutputFormat};

#[derive(Debug, Parser)]
#[command(name = "notesync", version, about = "Notes that follow you across devices")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create, edit and inspect notes
    #[command(subcommand)]
    Note(NoteCommand),
    /// Manage folders
    #[command(subcommand)]
    Folder(FolderCommand),
    /// Archive a note, or restore it with --undo
    Archive(ArchiveCommand),
    /// Synchronize notes with the remote store
    Sync(SyncCommand),
    /// Show synchronization status
    Status(StatusCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays parseable
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CliContext {
        format,
        config_path: cli.config.clone().unwrap_or_else(Config::default_path),
    };

    if let Err(e) = run(cli.command, &ctx).await {
        get_formatter(format).error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(command: Commands, ctx: &CliContext) -> Result<()> {
    match command {
        Commands::Note(cmd) => cmd.execute(ctx).await,
        Commands::Folder(cmd) => cmd.execute(ctx).await,
        Commands::Archive(cmd) => cmd.execute(ctx).await,
        Commands::Sync(cmd) => cmd.execute(ctx).await,
        Commands::Status(cmd) => cmd.execute(ctx).await,
        Commands::Config(cmd) => cmd.execute(ctx).await,
    }
}
