//! Sync command - Run one reconciliation cycle
//!
//! Flushes queued uploads, reconciles with the remote store and prints a
//! summary of what moved in each direction.

use anyhow::Result;
use clap::Args;
use tracing::info;

use notesync_sync::SyncReport;

use super::{open_engine, CliContext};
use crate::output::{get_formatter, to_json, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Persist local state before syncing, like an explicit save
    #[arg(long)]
    pub save: bool,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let config = ctx.load_config();
        let engine = open_engine(&config).await?;

        info!(save = self.save, "Running sync");
        let result = if self.save {
            engine.save_now().await
        } else {
            engine.sync_now().await
        };
        engine.shutdown().await?;

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                let message = e.user_message();
                return Err(anyhow::Error::new(e).context(message));
            }
        };
        if ctx.format.is_json() {
            formatter.print_json(&to_json(&report)?);
        } else {
            print_report(&*formatter, &report);
        }
        Ok(())
    }
}

fn print_report(formatter: &dyn OutputFormatter, report: &SyncReport) {
    if report.is_success() {
        formatter.success(&format!("Sync complete: {}", report.summary()));
    } else {
        formatter.warn(&format!(
            "Sync incomplete, {} note(s) will be retried",
            report.errors.len()
        ));
        for error in &report.errors {
            formatter.info(error);
        }
    }
    formatter.info(&format!("path: {} ({} ms)", report.path, report.duration_ms));
    if report.conflicts > 0 {
        formatter.warn(&format!(
            "{} note(s) were edited on several devices; the most recent version was kept",
            report.conflicts
        ));
    }
    if report.healed_index {
        formatter.warn("Remote note list was unreadable and was restored from the local copy");
    }
    if report.deferred {
        formatter.info("Edits made during the sync will go out with the next one");
    }
}
