//! Folder command - Manage folders in the note list

use anyhow::Result;
use clap::Subcommand;

use super::{open_engine, parse_folder_id, CliContext};
use crate::output::get_formatter;

#[derive(Debug, Subcommand)]
pub enum FolderCommand {
    /// Create a folder
    Add { name: String },
    /// Rename a folder
    Rename { id: String, name: String },
    /// Collapse or expand a folder in the note list
    Collapse {
        id: String,
        /// Expand instead of collapsing
        #[arg(long)]
        expand: bool,
    },
}

impl FolderCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let engine = open_engine(&ctx.load_config()).await?;

        let (id, message) = match self {
            FolderCommand::Add { name } => {
                let id = engine.create_folder(name).await?;
                (id, format!("Created folder \"{name}\""))
            }
            FolderCommand::Rename { id, name } => {
                let id = parse_folder_id(id)?;
                let target = id.clone();
                let new_name = name.clone();
                engine
                    .edit_structure(move |index| index.rename_folder(&target, new_name))
                    .await?;
                (id, format!("Renamed folder to \"{name}\""))
            }
            FolderCommand::Collapse { id, expand } => {
                let id = parse_folder_id(id)?;
                let target = id.clone();
                let collapsed = !expand;
                engine
                    .edit_structure(move |index| index.set_folder_collapsed(&target, collapsed))
                    .await?;
                let verb = if collapsed { "Collapsed" } else { "Expanded" };
                (id, format!("{verb} folder"))
            }
        };
        engine.shutdown().await?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({ "success": true, "id": id }));
        } else {
            formatter.success(&message);
            formatter.info(&format!("id: {id}"));
        }
        Ok(())
    }
}
