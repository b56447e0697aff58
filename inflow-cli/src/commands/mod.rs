//! CLI command implementations

pub mod history;
pub mod import;
pub mod logs;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use inflow_core::{EntryPoint, InflowContext, LogEvent, LoggingService};

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<Arc<LoggingService>>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the data directory from environment or default
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("INFLOW_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().context("Could not find home directory (set INFLOW_DIR)")?;
    Ok(home.join(".inflow"))
}

/// Get or create the Inflow context
pub fn get_context() -> Result<InflowContext> {
    let data_dir = get_data_dir()?;

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    InflowContext::new(&data_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))
        .context("Failed to initialize inflow context")
}
