//! Status command - Show local sync state
//!
//! Reads the persisted sync state and the local index only; no remote
//! calls are made.

use anyhow::Result;
use clap::Args;

use super::{open_engine, CliContext};
use crate::output::get_formatter;

#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let config = ctx.load_config();
        let engine = open_engine(&config).await?;
        let index = engine.index().await?;
        let status = engine.status();
        engine.shutdown().await?;

        let archived = index.notes.iter().filter(|n| n.archived).count();
        let last_sync = status
            .last_synced_remote_ts
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::json!({
                "data_dir": config.sync.data_dir.display().to_string(),
                "remote": config.remote.backend,
                "notes": index.notes.len(),
                "archived": archived,
                "folders": index.folders.len(),
                "last_sync": last_sync,
                "status": status,
            }));
            return Ok(());
        }

        if status.dirty {
            formatter.warn("Local changes not yet synced");
        } else {
            formatter.success("Up to date");
        }
        formatter.info(&format!("Data directory: {}", config.sync.data_dir.display()));
        formatter.info(&format!(
            "Remote:         {} ({})",
            config.remote.backend,
            config.remote.path.display()
        ));
        formatter.info(&format!(
            "Notes:          {} ({} archived) in {} folder(s)",
            index.notes.len(),
            archived,
            index.folders.len()
        ));
        formatter.info(&format!("Last sync:      {last_sync}"));
        if !status.dirty_notes.is_empty() {
            formatter.info(&format!("Changed:        {}", status.dirty_notes.len()));
            for id in &status.dirty_notes {
                let title = index.note(id).map(|n| n.title.as_str()).unwrap_or("?");
                formatter.info(&format!("  * {id}  {title}"));
            }
        }
        if !status.deleted_notes.is_empty() {
            formatter.info(&format!("Deleted:        {}", status.deleted_notes.len()));
        }
        Ok(())
    }
}
