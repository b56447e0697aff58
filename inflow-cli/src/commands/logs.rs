//! Logs command - view and manage application logs

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use super::get_data_dir;
use crate::output::{self, format_timestamp_ms};
use inflow_core::services::logging::now_ms;
use inflow_core::{EntryPoint, LogLevel, LoggingService};

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show recent log entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Minimum level to show (debug, info, warn, error)
        #[arg(long, default_value = "info")]
        level: LogLevel,
        /// Show only errors
        #[arg(long)]
        errors: bool,
        /// Only entries of one import batch
        #[arg(long)]
        batch: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear old log entries
    Clear {
        /// Delete logs older than N days
        #[arg(long, default_value = "30")]
        older_than_days: u64,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show log statistics and database path
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy the logs database to a file for troubleshooting
    Export {
        /// Destination file
        output: PathBuf,
    },
}

fn get_logging_service() -> Result<LoggingService> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    Ok(LoggingService::new(
        &data_dir,
        EntryPoint::Cli,
        env!("CARGO_PKG_VERSION"),
    )?)
}

pub fn run(command: LogsCommands) -> Result<()> {
    match command {
        LogsCommands::List {
            limit,
            level,
            errors,
            batch,
            json,
        } => {
            let service = get_logging_service()?;
            let entries = match (&batch, errors) {
                (Some(batch_id), _) => service.get_batch(batch_id)?,
                (None, true) => service.get_errors(limit)?,
                (None, false) => service.get_recent(limit, level)?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            if entries.is_empty() {
                println!("No log entries found.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Time", "Level", "Event", "Context", "Error"]);

            for entry in &entries {
                let context = [
                    entry.command.as_deref(),
                    entry.batch_id.as_deref(),
                    entry.detail.as_deref(),
                ]
                .iter()
                .filter_map(|&s| s)
                .collect::<Vec<_>>()
                .join(", ");

                let level = match entry.level.as_str() {
                    "error" => entry.level.red().to_string(),
                    "warn" => entry.level.yellow().to_string(),
                    _ => entry.level.clone(),
                };

                table.add_row(vec![
                    format_timestamp_ms(entry.timestamp),
                    level,
                    entry.event.clone(),
                    context,
                    entry.error_message.clone().unwrap_or_default(),
                ]);
            }

            println!("{}", table);
        }
        LogsCommands::Clear {
            older_than_days,
            force,
            json,
        } => {
            let service = get_logging_service()?;
            let cutoff_ms = now_ms() - (older_than_days as i64 * 24 * 60 * 60 * 1000);

            if !force && !json {
                use dialoguer::Confirm;
                if !Confirm::new()
                    .with_prompt(format!("Delete logs older than {} days?", older_than_days))
                    .default(false)
                    .interact()?
                {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let deleted = service.delete_before(cutoff_ms)?;

            if json {
                println!("{}", serde_json::json!({ "deleted": deleted }));
            } else {
                println!("Deleted {} log entries", deleted);
            }
        }
        LogsCommands::Stats { json } => {
            let service = get_logging_service()?;
            let total = service.count()?;
            let by_level = service.count_by_level()?;
            let db_path = service.db_path().to_path_buf();
            let size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

            if json {
                let levels: serde_json::Map<String, serde_json::Value> = by_level
                    .iter()
                    .map(|(level, count)| (level.to_string(), serde_json::Value::from(*count)))
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "total_entries": total,
                        "by_level": levels,
                        "database_path": db_path.to_string_lossy(),
                        "database_size_bytes": size_bytes
                    })
                );
            } else {
                println!("{}", "Log Statistics".bold());
                println!("  Total entries: {}", total);
                for (level, count) in &by_level {
                    println!("  {}: {}", level, count);
                }
                println!("  Database: {}", db_path.display());
                println!("  Size: {} bytes", size_bytes);
            }
        }
        LogsCommands::Export { output: dest } => {
            let service = get_logging_service()?;
            let path = service
                .export(&dest)
                .with_context(|| format!("Failed to export logs to {}", dest.display()))?;
            output::success(&format!("Logs exported to {}", path.display()));
        }
    }

    Ok(())
}
