//! DuckDB repository implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, Connection};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{
    Allocation, ImportBatch, NamedVariant, StatementFormat, Transaction, TransactionDraft,
    TransactionSource, TransactionSubtype,
};
use crate::ports::{DuplicateQuery, TransactionStore};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Timestamps are stored as naive UTC
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

const TRANSACTION_COLUMNS: &str = "transaction_id, owner_id, description, transaction_date::VARCHAR,
    occurred_at::VARCHAR, amount::VARCHAR, category_id, subcategory_id, counter_account_id,
    transaction_type, subtype, source, external_ref, allocations, import_batch_id,
    created_at::VARCHAR";

/// A sys_transactions row as read, before domain conversion
struct TransactionRow {
    id: String,
    owner_id: i64,
    description: String,
    transaction_date: String,
    occurred_at: String,
    amount: String,
    category_id: i64,
    subcategory_id: Option<i64>,
    counter_account_id: Option<i64>,
    transaction_type: String,
    subtype: Option<String>,
    source: Option<String>,
    external_ref: Option<String>,
    allocations: String,
    import_batch_id: Option<String>,
    created_at: String,
}

impl TransactionRow {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            description: row.get(2)?,
            transaction_date: row.get(3)?,
            occurred_at: row.get(4)?,
            amount: row.get(5)?,
            category_id: row.get(6)?,
            subcategory_id: row.get(7)?,
            counter_account_id: row.get(8)?,
            transaction_type: row.get(9)?,
            subtype: row.get(10)?,
            source: row.get(11)?,
            external_ref: row.get(12)?,
            allocations: row.get(13)?,
            import_batch_id: row.get(14)?,
            created_at: row.get(15)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        let allocations: Vec<Allocation> = serde_json::from_str(&self.allocations)?;
        Ok(Transaction {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| {
                    Error::database(format!("Invalid transaction id '{}': {}", self.id, e))
                })?,
            owner_id: self.owner_id,
            description: self.description,
            transaction_date: parse_date(&self.transaction_date)?,
            occurred_at: parse_timestamp(&self.occurred_at)?,
            amount: Decimal::from_str(&self.amount)
                .map_err(|e| Error::database(format!("Invalid amount '{}': {}", self.amount, e)))?,
            category_id: self.category_id,
            subcategory_id: self.subcategory_id,
            counter_account_id: self.counter_account_id,
            transaction_type: stored_variant("transaction_type", &self.transaction_type)?,
            subtype: self
                .subtype
                .as_deref()
                .map(|s| stored_variant::<TransactionSubtype>("subtype", s))
                .transpose()?,
            source: self
                .source
                .as_deref()
                .map(|s| stored_variant::<TransactionSource>("source", s))
                .transpose()?,
            external_ref: self.external_ref,
            allocations,
            import_batch_id: self.import_batch_id,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

const BATCH_SELECT: &str = "SELECT batch_id, owner_id, file_name, checksum, format, total_count,
    processed_count, created_count, duplicate_count, issue_count, imported_at::VARCHAR
    FROM sys_import_batches";

struct ImportBatchRow {
    batch_id: String,
    owner_id: i64,
    file_name: Option<String>,
    checksum: String,
    format: String,
    counts: [i64; 5],
    imported_at: String,
}

impl ImportBatchRow {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            batch_id: row.get(0)?,
            owner_id: row.get(1)?,
            file_name: row.get(2)?,
            checksum: row.get(3)?,
            format: row.get(4)?,
            counts: [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
            imported_at: row.get(10)?,
        })
    }

    fn into_batch(self) -> Result<ImportBatch> {
        let [total, processed, created, duplicates, issue_count] =
            self.counts.map(|c| c.max(0) as usize);
        Ok(ImportBatch {
            batch_id: self.batch_id,
            owner_id: self.owner_id,
            file_name: self.file_name,
            checksum: self.checksum,
            format: parse_format(&self.format)?,
            total,
            processed,
            created,
            duplicates,
            issue_count,
            imported_at: parse_timestamp(&self.imported_at)?,
        })
    }
}

/// DuckDB repository implementation
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Open (or create) the database at `db_path`
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which can occur when a second process (e.g. another CLI invocation)
    /// holds the database file open.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[inflow] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::database(format!("Failed to open database after {} retries", MAX_RETRIES))
        }))
    }

    /// Attempt to open a database connection (called by new() with retry logic)
    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; JSON is statically linked via the "json" feature
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Connection lock poisoned: {}", e)))
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    /// Every stored transaction of `owner_id`, oldest first
    pub fn get_transactions(&self, owner_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_transactions WHERE owner_id = ?
             ORDER BY occurred_at, created_at",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![owner_id], TransactionRow::read)?;

        let mut transactions = Vec::new();
        for row in rows {
            transactions.push(row?.into_transaction()?);
        }
        Ok(transactions)
    }

    /// Transactions created by one import batch
    pub fn get_batch_transactions(&self, batch_id: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_transactions WHERE import_batch_id = ? ORDER BY created_at",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![batch_id], TransactionRow::read)?;

        let mut transactions = Vec::new();
        for row in rows {
            transactions.push(row?.into_transaction()?);
        }
        Ok(transactions)
    }

    pub fn count_transactions(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sys_transactions", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }
}

impl TransactionStore for DuckDbRepository {
    fn create_transaction(
        &self,
        draft: &TransactionDraft,
        import_batch_id: Option<&str>,
    ) -> Result<Transaction> {
        draft.validate()?;

        let mut transaction = Transaction::from_draft(draft, import_batch_id);
        // Same rounding DuckDB applies when casting to DECIMAL(18,2)
        transaction.amount = transaction
            .amount
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let allocations = serde_json::to_string(&transaction.allocations)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_transactions (transaction_id, owner_id, description, transaction_date,
                                           occurred_at, amount, category_id, subcategory_id,
                                           counter_account_id, transaction_type, subtype, source,
                                           external_ref, allocations, import_batch_id, created_at)
             VALUES (?, ?, ?, CAST(? AS DATE), CAST(? AS TIMESTAMP), CAST(? AS DECIMAL(18, 2)),
                     ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
            params![
                transaction.id.to_string(),
                transaction.owner_id,
                transaction.description,
                transaction.transaction_date.to_string(),
                format_timestamp(&transaction.occurred_at),
                transaction.amount.to_string(),
                transaction.category_id,
                transaction.subcategory_id,
                transaction.counter_account_id,
                transaction.transaction_type.as_str(),
                transaction.subtype.map(|s| s.as_str()),
                transaction.source.map(|s| s.as_str()),
                transaction.external_ref,
                allocations,
                transaction.import_batch_id,
                format_timestamp(&transaction.created_at),
            ],
        )?;

        Ok(transaction)
    }

    fn find_duplicate_candidates(&self, query: &DuplicateQuery) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_transactions
             WHERE owner_id = ?
               AND amount = CAST(? AS DECIMAL(18, 2))
               AND description = ?
               AND occurred_at BETWEEN CAST(? AS TIMESTAMP) AND CAST(? AS TIMESTAMP)",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![
                query.owner_id,
                query.amount.abs().to_string(),
                query.description,
                format_timestamp(&query.from),
                format_timestamp(&query.to),
            ],
            TransactionRow::read,
        )?;

        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?.into_transaction()?);
        }
        Ok(candidates)
    }

    fn record_import_batch(&self, batch: &ImportBatch) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_import_batches (batch_id, owner_id, file_name, checksum, format,
                                             total_count, processed_count, created_count,
                                             duplicate_count, issue_count, imported_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP))",
            params![
                batch.batch_id,
                batch.owner_id,
                batch.file_name,
                batch.checksum,
                batch.format.to_string(),
                batch.total as i64,
                batch.processed as i64,
                batch.created as i64,
                batch.duplicates as i64,
                batch.issue_count as i64,
                format_timestamp(&batch.imported_at),
            ],
        )?;
        Ok(())
    }

    fn list_import_batches(&self, owner_id: Option<i64>, limit: usize) -> Result<Vec<ImportBatch>> {
        let conn = self.conn()?;
        let mut batches = Vec::new();
        match owner_id {
            Some(owner) => {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE owner_id = ? ORDER BY imported_at DESC, batch_id DESC LIMIT ?",
                    BATCH_SELECT
                ))?;
                let rows = stmt.query_map(params![owner, limit as i64], ImportBatchRow::read)?;
                for row in rows {
                    batches.push(row?.into_batch()?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{} ORDER BY imported_at DESC, batch_id DESC LIMIT ?",
                    BATCH_SELECT
                ))?;
                let rows = stmt.query_map(params![limit as i64], ImportBatchRow::read)?;
                for row in rows {
                    batches.push(row?.into_batch()?);
                }
            }
        }
        Ok(batches)
    }
}

// Helper functions

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::database(format!("Invalid stored timestamp '{}': {}", s, e)))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::database(format!("Invalid stored date '{}': {}", s, e)))
}

fn parse_format(s: &str) -> Result<StatementFormat> {
    match s {
        "CSV" => Ok(StatementFormat::Delimited),
        "OFX" => Ok(StatementFormat::ExchangeFormat),
        other => Err(Error::database(format!("Invalid stored format '{}'", other))),
    }
}

fn stored_variant<E: NamedVariant>(column: &str, raw: &str) -> Result<E> {
    E::from_name(raw)
        .ok_or_else(|| Error::database(format!("Invalid stored {} '{}'", column, raw)))
}
