//! Archive command - Move notes in and out of the archive

use anyhow::{bail, Result};
use clap::Args;

use super::{note::save, open_engine, parse_note_id, CliContext};

#[derive(Debug, Args)]
pub struct ArchiveCommand {
    /// Note id
    pub id: String,
    /// Restore the note from the archive
    #[arg(long)]
    pub undo: bool,
}

impl ArchiveCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let id = parse_note_id(&self.id)?;
        let engine = open_engine(&ctx.load_config()).await?;
        let Some(mut note) = engine.note(&id).await? else {
            bail!("Note {id} does not exist");
        };
        let archived = !self.undo;
        if note.archived == archived {
            bail!(
                "Note {id} is {} archived",
                if archived { "already" } else { "not" }
            );
        }
        note.set_archived(archived);
        save(ctx, &engine, note, if archived { "Archived" } else { "Restored" }).await
    }
}
