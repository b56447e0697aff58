//! Heuristic duplicate detection
//!
//! Two transactions are considered duplicates when they share owner, amount
//! and description and fall on the same calendar day in the import's time zone.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;

use crate::domain::result::{Error, Result};
use crate::domain::TransactionDraft;
use crate::parsers::locale::localize;
use crate::ports::{DuplicateQuery, TransactionStore};

/// Identity of a draft for in-batch duplicate tracking
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DuplicateKey {
    owner_id: i64,
    amount: Decimal,
    description: String,
    date: NaiveDate,
}

impl DuplicateKey {
    pub fn of(draft: &TransactionDraft) -> Self {
        Self {
            owner_id: draft.owner_id,
            // 45.9 and 45.90 must collide
            amount: draft.amount.normalize(),
            description: draft.description.clone(),
            date: draft.transaction_date,
        }
    }
}

/// Inclusive UTC bounds of `date` as a local day in `tz`
pub fn day_window(date: NaiveDate, tz: Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let out_of_range = || Error::validation(format!("Date {} is out of range", date));
    let next = date.succ_opt().ok_or_else(out_of_range)?;

    let start = localize(date.and_hms_opt(0, 0, 0).ok_or_else(out_of_range)?, tz)
        .ok_or_else(out_of_range)?;
    let next_start = localize(next.and_hms_opt(0, 0, 0).ok_or_else(out_of_range)?, tz)
        .ok_or_else(out_of_range)?;

    Ok((
        start.with_timezone(&Utc),
        next_start.with_timezone(&Utc) - Duration::microseconds(1),
    ))
}

/// Checks drafts against stored transactions and the current batch
pub struct DuplicateDetector<'a> {
    store: &'a dyn TransactionStore,
    time_zone: Tz,
    seen: HashSet<DuplicateKey>,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(store: &'a dyn TransactionStore, time_zone: Tz) -> Self {
        Self {
            store,
            time_zone,
            seen: HashSet::new(),
        }
    }

    /// Whether `draft` matches a stored transaction or one accepted earlier in this batch
    pub fn is_duplicate(&self, draft: &TransactionDraft) -> Result<bool> {
        if self.seen.contains(&DuplicateKey::of(draft)) {
            return Ok(true);
        }

        let (from, to) = day_window(draft.transaction_date, self.time_zone)?;
        let candidates = self.store.find_duplicate_candidates(&DuplicateQuery {
            owner_id: draft.owner_id,
            amount: draft.amount,
            description: draft.description.clone(),
            from,
            to,
        })?;

        Ok(!candidates.is_empty())
    }

    /// Record an accepted draft so later entries in the batch see it
    pub fn accept(&mut self, draft: &TransactionDraft) {
        self.seen.insert(DuplicateKey::of(draft));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryRepository;
    use crate::domain::TransactionType;
    use chrono::TimeZone;

    fn draft(description: &str, cents: i64, date: NaiveDate) -> TransactionDraft {
        TransactionDraft {
            owner_id: 1,
            description: description.to_string(),
            transaction_date: date,
            occurred_at: Utc.from_utc_datetime(&date.and_hms_opt(15, 0, 0).unwrap()),
            amount: Decimal::new(cents, 2),
            category_id: 5,
            subcategory_id: None,
            counter_account_id: None,
            transaction_type: TransactionType::Expense,
            subtype: None,
            source: None,
            external_ref: None,
            allocations: Vec::new(),
        }
    }

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_day_window_follows_time_zone() {
        let (from, to) = day_window(jan(1), chrono_tz::America::Sao_Paulo).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap());
        assert_eq!(
            to,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap() - Duration::microseconds(1)
        );
    }

    #[test]
    fn test_detects_stored_duplicate() {
        let store = MemoryRepository::new();
        store.create_transaction(&draft("Groceries", 4590, jan(1)), None).unwrap();

        let detector = DuplicateDetector::new(&store, Tz::UTC);
        assert!(detector.is_duplicate(&draft("Groceries", 4590, jan(1))).unwrap());
        assert!(!detector.is_duplicate(&draft("Groceries", 4590, jan(2))).unwrap());
        assert!(!detector.is_duplicate(&draft("Groceries", 4591, jan(1))).unwrap());
        assert!(!detector.is_duplicate(&draft("Bakery", 4590, jan(1))).unwrap());
    }

    #[test]
    fn test_accepted_drafts_are_visible() {
        let store = MemoryRepository::new();
        let mut detector = DuplicateDetector::new(&store, Tz::UTC);

        let first = draft("Coffee", 350, jan(3));
        assert!(!detector.is_duplicate(&first).unwrap());
        detector.accept(&first);

        let mut second = draft("Coffee", 35, jan(3));
        second.amount = Decimal::new(350, 2).normalize();
        assert!(detector.is_duplicate(&second).unwrap());
    }
}
