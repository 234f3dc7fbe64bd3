//! Config command - Show and validate the NoteSync configuration

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use notesync_core::config::Config;

use super::CliContext;
use crate::output::get_formatter;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            ConfigCommand::Show => show(ctx),
            ConfigCommand::Validate => validate(ctx),
        }
    }
}

fn show(ctx: &CliContext) -> Result<()> {
    let formatter = get_formatter(ctx.format);
    let config = ctx.load_config();
    info!(config_path = %ctx.config_path.display(), "Showing configuration");

    if ctx.format.is_json() {
        let json = serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    let source = if ctx.config_path.exists() {
        ctx.config_path.display().to_string()
    } else {
        format!("defaults, {} not found", ctx.config_path.display())
    };
    formatter.success(&format!("Configuration ({source})"));
    formatter.info("");
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }
    Ok(())
}

fn validate(ctx: &CliContext) -> Result<()> {
    let formatter = get_formatter(ctx.format);
    let path = &ctx.config_path;

    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            let message = if path.exists() {
                format!("Failed to parse configuration: {e}")
            } else {
                "Configuration file not found, defaults apply".to_string()
            };
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": false,
                    "config_path": path.display().to_string(),
                    "errors": [message],
                }));
            } else {
                formatter.error(&message);
                formatter.info(&format!("File: {}", path.display()));
            }
            return Ok(());
        }
    };

    let errors = config.validate();
    if ctx.format.is_json() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": path.display().to_string(),
            "errors": messages,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
        formatter.info(&format!("File: {}", path.display()));
    } else {
        formatter.error(&format!(
            "Configuration has {} error{}:",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        ));
        formatter.info(&format!("File: {}", path.display()));
        for error in &errors {
            formatter.info(&format!("  {} - {}", error.field, error.message));
        }
    }
    Ok(())
}
