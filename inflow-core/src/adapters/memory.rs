//! In-process transaction store
//!
//! Backs unit tests and dry tooling that don't need a database file. A
//! rejection rule can be installed to simulate store-side validation failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::domain::result::{Error, Result};
use crate::domain::{ImportBatch, Transaction, TransactionDraft};
use crate::ports::{DuplicateQuery, TransactionStore};

type RejectionRule = Box<dyn Fn(&TransactionDraft) -> Option<String> + Send + Sync>;

#[derive(Default)]
pub struct MemoryRepository {
    transactions: Mutex<Vec<Transaction>>,
    batches: Mutex<Vec<ImportBatch>>,
    create_calls: AtomicUsize,
    rejection: Option<RejectionRule>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every draft for which `rule` returns a message
    pub fn with_rejection<F>(mut self, rule: F) -> Self
    where
        F: Fn(&TransactionDraft) -> Option<String> + Send + Sync + 'static,
    {
        self.rejection = Some(Box::new(rule));
        self
    }

    /// Snapshot of every stored transaction, in creation order
    pub fn transactions(&self) -> Vec<Transaction> {
        lock(&self.transactions).map(|t| t.clone()).unwrap_or_default()
    }

    /// Number of `create_transaction` calls, successful or not
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

impl TransactionStore for MemoryRepository {
    fn create_transaction(
        &self,
        draft: &TransactionDraft,
        import_batch_id: Option<&str>,
    ) -> Result<Transaction> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        draft.validate()?;
        if let Some(message) = self.rejection.as_ref().and_then(|rule| rule(draft)) {
            return Err(Error::validation(message));
        }

        let transaction = Transaction::from_draft(draft, import_batch_id);
        lock(&self.transactions)?.push(transaction.clone());
        Ok(transaction)
    }

    fn find_duplicate_candidates(&self, query: &DuplicateQuery) -> Result<Vec<Transaction>> {
        Ok(lock(&self.transactions)?
            .iter()
            .filter(|t| {
                t.owner_id == query.owner_id
                    && t.amount == query.amount
                    && t.description == query.description
                    && t.occurred_at >= query.from
                    && t.occurred_at <= query.to
            })
            .cloned()
            .collect())
    }

    fn record_import_batch(&self, batch: &ImportBatch) -> Result<()> {
        lock(&self.batches)?.push(batch.clone());
        Ok(())
    }

    fn list_import_batches(&self, owner_id: Option<i64>, limit: usize) -> Result<Vec<ImportBatch>> {
        Ok(lock(&self.batches)?
            .iter()
            .rev()
            .filter(|b| owner_id.map_or(true, |o| b.owner_id == o))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StatementFormat, TransactionType};
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn draft(description: &str) -> TransactionDraft {
        TransactionDraft {
            owner_id: 1,
            description: description.to_string(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            amount: Decimal::new(1000, 2),
            category_id: 1,
            subcategory_id: None,
            counter_account_id: None,
            transaction_type: TransactionType::Expense,
            subtype: None,
            source: None,
            external_ref: None,
            allocations: Vec::new(),
        }
    }

    #[test]
    fn test_rejection_rule() {
        let store = MemoryRepository::new().with_rejection(|d| {
            (d.description == "Forbidden").then(|| "Counter-account is closed".to_string())
        });

        assert!(store.create_transaction(&draft("Fine"), Some("b1")).is_ok());
        let err = store.create_transaction(&draft("Forbidden"), Some("b1")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.create_calls(), 2);
        assert_eq!(store.transactions().len(), 1);
        assert_eq!(store.transactions()[0].import_batch_id.as_deref(), Some("b1"));
    }

    #[test]
    fn test_batches_newest_first() {
        let store = MemoryRepository::new();
        for (i, owner) in [1, 2, 1].into_iter().enumerate() {
            store
                .record_import_batch(&ImportBatch {
                    batch_id: format!("b{}", i),
                    owner_id: owner,
                    file_name: None,
                    checksum: String::new(),
                    format: StatementFormat::Delimited,
                    total: 0,
                    processed: 0,
                    created: 0,
                    duplicates: 0,
                    issue_count: 0,
                    imported_at: Utc::now(),
                })
                .unwrap();
        }

        let mine = store.list_import_batches(Some(1), 10).unwrap();
        let ids: Vec<_> = mine.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "b0"]);
        assert_eq!(store.list_import_batches(None, 1).unwrap()[0].batch_id, "b2");
    }
}
