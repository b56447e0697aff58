//! Inflow Core - bank-statement ingestion for personal finance
//!
//! This crate implements the import pipeline following hexagonal architecture:
//!
//! - **domain**: Transactions, import requests and results, errors
//! - **ports**: The `TransactionStore` trait the pipeline persists through
//! - **parsers**: Format resolution plus the CSV and OFX statement grammars
//! - **services**: Normalization, duplicate detection, import orchestration, logging
//! - **adapters**: Concrete stores (DuckDB, in-memory)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod parsers;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use adapters::duckdb::DuckDbRepository;
use config::Config;
use services::ImportService;

// Re-export commonly used types at crate root
pub use domain::result::{Error, OperationResult, Result};
pub use domain::{
    ImportBatch, ImportIssue, ImportRequest, ImportResult, IssueKind, StatementFormat,
    StatementUpload, Transaction, TransactionDraft,
};
pub use ports::TransactionStore;
pub use services::{EntryPoint, LogEvent, LogLevel, LoggingService};

/// Main context for Inflow operations
///
/// Holds the configuration, the transaction database and the services
/// built on top of it.
pub struct InflowContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub import_service: ImportService,
    pub logger: Option<Arc<LoggingService>>,
}

impl InflowContext {
    /// Open the data directory, creating the database schema as needed
    ///
    /// The event log is optional: if logs.duckdb cannot be opened the
    /// context is still usable, just without logging.
    pub fn new(data_dir: &Path, entry_point: EntryPoint, app_version: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let config = Config::load(data_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&data_dir.join("inflow.duckdb"))?);
        repository.ensure_schema()?;

        let logger = LoggingService::new(data_dir, entry_point, app_version)
            .ok()
            .map(Arc::new);

        let store: Arc<dyn TransactionStore> = repository.clone();
        let mut import_service = ImportService::new(store);
        if let Some(logger) = &logger {
            import_service = import_service.with_logger(Arc::clone(logger));
        }

        Ok(Self {
            config,
            repository,
            import_service,
            logger,
        })
    }
}
