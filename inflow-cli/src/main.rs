//! Inflow CLI - bank statement import in your terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{history, import, logs};

/// Inflow - import bank and card statements into your ledger
#[derive(Parser)]
#[command(name = "inflow", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import transactions from a CSV or OFX/QFX statement
    Import(import::ImportArgs),

    /// Show previous imports
    History {
        /// Only imports of this owner
        #[arg(long)]
        owner: Option<i64>,
        /// Number of imports to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage application logs
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Import(args) => import::run(args),
        Commands::History { owner, limit, json } => history::run(owner, limit, json),
        Commands::Logs { command } => logs::run(command),
    }
}
