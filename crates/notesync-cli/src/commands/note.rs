//! Note command - Create, edit, remove and inspect notes
//!
//! Every write goes through the sync engine so the change is marked for
//! the next reconciliation and its upload is queued right away.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Subcommand;
use tracing::info;

use notesync_core::domain::{IndexDocument, Note, NoteId, TopLevelItem};
use notesync_sync::SyncEngine;

use super::{
    finish, open_engine, outcome_label, parse_folder_id, parse_note_id, read_content, CliContext,
};
use crate::output::{get_formatter, to_json, truncate, OutputFormatter};

/// Note subcommands
#[derive(Debug, Subcommand)]
pub enum NoteCommand {
    /// Create a note
    Add {
        title: String,
        /// Note text
        #[arg(long)]
        content: Option<String>,
        /// Read the note text from a file
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// Syntax language of the content
        #[arg(long)]
        language: Option<String>,
        /// Folder id to place the note in
        #[arg(long)]
        folder: Option<String>,
    },
    /// Change an existing note
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        #[arg(long)]
        language: Option<String>,
        /// Move the note into a folder
        #[arg(long)]
        folder: Option<String>,
        /// Take the note out of its folder
        #[arg(long, conflicts_with = "folder")]
        no_folder: bool,
    },
    /// Delete a note
    Rm { id: String },
    /// List notes in display order
    List {
        /// List archived notes instead of active ones
        #[arg(long)]
        archived: bool,
    },
    /// Print a note
    Show { id: String },
}

impl NoteCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            NoteCommand::Add {
                title,
                content,
                file,
                language,
                folder,
            } => {
                let content = read_content(content.as_deref(), file.as_deref())?.unwrap_or_default();
                let mut note = Note::new(NoteId::generate(), title.clone(), content);
                if let Some(language) = language {
                    note.set_language(language.clone());
                }
                if let Some(folder) = folder {
                    note.set_folder(Some(parse_folder_id(folder)?));
                }
                let engine = open_engine(&ctx.load_config()).await?;
                save(ctx, &engine, note, "Created").await
            }
            NoteCommand::Edit {
                id,
                title,
                content,
                file,
                language,
                folder,
                no_folder,
            } => {
                let id = parse_note_id(id)?;
                let engine = open_engine(&ctx.load_config()).await?;
                let Some(mut note) = engine.note(&id).await? else {
                    bail!("Note {id} does not exist");
                };

                if let Some(title) = title {
                    note.set_title(title.clone());
                }
                if let Some(content) = read_content(content.as_deref(), file.as_deref())? {
                    note.set_content(content);
                }
                if let Some(language) = language {
                    note.set_language(language.clone());
                }
                if let Some(folder) = folder {
                    note.set_folder(Some(parse_folder_id(folder)?));
                } else if *no_folder {
                    note.set_folder(None);
                }
                save(ctx, &engine, note, "Updated").await
            }
            NoteCommand::Rm { id } => remove(ctx, &parse_note_id(id)?).await,
            NoteCommand::List { archived } => list(ctx, *archived).await,
            NoteCommand::Show { id } => show(ctx, &parse_note_id(id)?).await,
        }
    }
}

/// Save `note` through the engine and report the upload outcome.
pub(super) async fn save(ctx: &CliContext, engine: &SyncEngine, note: Note, verb: &str) -> Result<()> {
    let formatter = get_formatter(ctx.format);
    let id = note.id.clone();
    let title = note.title.clone();
    info!(note_id = %id, "Saving note");
    let ticket = engine.save_note(note).await?;
    let outcome = finish(engine, ticket, &*formatter).await?;

    if ctx.format.is_json() {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "id": id,
            "title": title,
            "remote": outcome_label(&outcome),
        }));
    } else {
        formatter.success(&format!("{verb} note \"{}\"", truncate(&title, 60)));
        formatter.info(&format!("id: {id}"));
    }
    Ok(())
}

async fn remove(ctx: &CliContext, id: &NoteId) -> Result<()> {
    let formatter = get_formatter(ctx.format);
    let config = ctx.load_config();
    let engine = open_engine(&config).await?;

    let ticket = engine.delete_note(id).await?;
    let outcome = finish(&engine, ticket, &*formatter).await?;

    if ctx.format.is_json() {
        formatter.print_json(&serde_json::json!({
            "success": true,
            "id": id,
            "remote": outcome_label(&outcome),
        }));
    } else {
        formatter.success(&format!("Deleted note {id}"));
    }
    Ok(())
}

async fn list(ctx: &CliContext, archived: bool) -> Result<()> {
    let formatter = get_formatter(ctx.format);
    let config = ctx.load_config();
    let engine = open_engine(&config).await?;
    let index = engine.index().await?;
    let status = engine.status();
    engine.shutdown().await?;

    let order = if archived {
        &index.archived_top_level_order
    } else {
        &index.top_level_order
    };

    if ctx.format.is_json() {
        let entries: Vec<serde_json::Value> = order
            .iter()
            .filter_map(|item| list_entry_json(&index, item))
            .collect();
        formatter.print_json(&serde_json::json!({ "items": entries }));
        return Ok(());
    }

    if order.is_empty() {
        formatter.info(if archived { "No archived notes" } else { "No notes" });
        return Ok(());
    }
    let marker = |id: &NoteId| if status.dirty_notes.contains(id) { "*" } else { " " };
    for item in order {
        match item {
            TopLevelItem::Note(id) => {
                if let Some(meta) = index.note(id) {
                    println!("{} {}  {}", marker(id), id, truncate(&meta.title, 60));
                }
            }
            TopLevelItem::Folder(folder_id) => {
                let Some(folder) = index.folder(folder_id) else {
                    continue;
                };
                let collapsed = index.collapsed_folder_ids.contains(folder_id);
                println!(
                    "{} {}/ ({} notes){}",
                    if collapsed { "\u{25b8}" } else { "\u{25be}" },
                    folder.name,
                    folder.note_ids.len(),
                    if collapsed { " collapsed" } else { "" }
                );
                for id in &folder.note_ids {
                    if let Some(meta) = index.note(id) {
                        println!("    {} {}  {}", marker(id), id, truncate(&meta.title, 56));
                    }
                }
            }
        }
    }
    Ok(())
}

fn list_entry_json(index: &IndexDocument, item: &TopLevelItem) -> Option<serde_json::Value> {
    match item {
        TopLevelItem::Note(id) => index.note(id).and_then(|meta| to_json(meta).ok()),
        TopLevelItem::Folder(id) => {
            let folder = index.folder(id)?;
            let notes: Vec<serde_json::Value> = folder
                .note_ids
                .iter()
                .filter_map(|nid| index.note(nid).and_then(|meta| to_json(meta).ok()))
                .collect();
            Some(serde_json::json!({
                "folder": folder.id,
                "name": folder.name,
                "collapsed": index.collapsed_folder_ids.contains(id),
                "notes": notes,
            }))
        }
    }
}

async fn show(ctx: &CliContext, id: &NoteId) -> Result<()> {
    let formatter = get_formatter(ctx.format);
    let config = ctx.load_config();
    let engine = open_engine(&config).await?;
    let note = engine.note(id).await?;
    engine.shutdown().await?;

    let Some(note) = note else {
        bail!("Note {id} does not exist");
    };
    if ctx.format.is_json() {
        formatter.print_json(&to_json(&note)?);
        return Ok(());
    }
    print_note(&*formatter, &note);
    Ok(())
}

fn print_note(formatter: &dyn OutputFormatter, note: &Note) {
    formatter.success(&note.title);
    formatter.info(&format!("id:       {}", note.id));
    formatter.info(&format!("modified: {}", note.modified.to_rfc3339()));
    if !note.language.is_empty() {
        formatter.info(&format!("language: {}", note.language));
    }
    if let Some(folder) = &note.folder_id {
        formatter.info(&format!("folder:   {folder}"));
    }
    if note.archived {
        formatter.info("archived");
    }
    println!();
    println!("{}", note.content);
}
