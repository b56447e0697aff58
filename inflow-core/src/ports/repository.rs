//! Transaction store port - persistence abstraction

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::result::Result;
use crate::domain::{ImportBatch, Transaction, TransactionDraft};

/// Lookup for stored transactions that may duplicate an incoming entry
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateQuery {
    pub owner_id: i64,
    /// Absolute amount
    pub amount: Decimal,
    pub description: String,
    /// Inclusive lower bound
    pub from: DateTime<Utc>,
    /// Inclusive upper bound
    pub to: DateTime<Utc>,
}

/// Persistence collaborator of the import pipeline
///
/// Implementations (adapters) provide the actual storage. Every call is its
/// own unit of work: the importer never wraps a batch in one transaction.
pub trait TransactionStore: Send + Sync {
    /// Persist a draft
    ///
    /// Fails with `Error::Validation` when the draft is rejected; the
    /// importer turns that into a row issue and carries on.
    fn create_transaction(
        &self,
        draft: &TransactionDraft,
        import_batch_id: Option<&str>,
    ) -> Result<Transaction>;

    /// Stored transactions matching owner, amount and description within
    /// the query's time window
    fn find_duplicate_candidates(&self, query: &DuplicateQuery) -> Result<Vec<Transaction>>;

    /// Record the outcome of a persisted import
    fn record_import_batch(&self, batch: &ImportBatch) -> Result<()>;

    /// Most recent import batches first, optionally for a single owner
    fn list_import_batches(&self, owner_id: Option<i64>, limit: usize) -> Result<Vec<ImportBatch>>;
}
