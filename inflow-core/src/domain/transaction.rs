//! Transaction domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::result::{Error, Result};

/// Enum whose variants are addressed by a fixed SCREAMING_SNAKE name
///
/// Statement columns, mapping tables and the CLI all refer to variants by
/// these names, matched case-insensitively.
pub trait NamedVariant: Sized + Copy + 'static {
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    /// Exact (case-insensitive, trimmed) name match
    fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str().eq_ignore_ascii_case(name))
    }
}

fn parse_named<E: NamedVariant>(s: &str, what: &str) -> Result<E> {
    E::from_name(s).ok_or_else(|| {
        let names: Vec<&str> = E::ALL.iter().map(|v| v.as_str()).collect();
        Error::validation(format!(
            "Unknown {} '{}' (expected one of {})",
            what,
            s,
            names.join(", ")
        ))
    })
}

/// Direction of money flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    /// Negative amounts are expenses, positive ones income; zero is undecided
    pub fn from_sign(amount: Decimal) -> Option<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            Some(TransactionType::Expense)
        } else if amount > Decimal::ZERO {
            Some(TransactionType::Income)
        } else {
            None
        }
    }
}

impl NamedVariant for TransactionType {
    const ALL: &'static [Self] = &[TransactionType::Income, TransactionType::Expense];

    fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
        }
    }
}

/// Budgeting classification of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionSubtype {
    Fixed,
    Variable,
    Occasional,
}

impl NamedVariant for TransactionSubtype {
    const ALL: &'static [Self] = &[
        TransactionSubtype::Fixed,
        TransactionSubtype::Variable,
        TransactionSubtype::Occasional,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            TransactionSubtype::Fixed => "FIXED",
            TransactionSubtype::Variable => "VARIABLE",
            TransactionSubtype::Occasional => "OCCASIONAL",
        }
    }
}

/// Payment channel the money moved through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionSource {
    Pix,
    Cash,
    DebitCard,
    CreditCard,
    BankTransfer,
    Boleto,
    Other,
}

impl NamedVariant for TransactionSource {
    const ALL: &'static [Self] = &[
        TransactionSource::Pix,
        TransactionSource::Cash,
        TransactionSource::DebitCard,
        TransactionSource::CreditCard,
        TransactionSource::BankTransfer,
        TransactionSource::Boleto,
        TransactionSource::Other,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Pix => "PIX",
            TransactionSource::Cash => "CASH",
            TransactionSource::DebitCard => "DEBIT_CARD",
            TransactionSource::CreditCard => "CREDIT_CARD",
            TransactionSource::BankTransfer => "BANK_TRANSFER",
            TransactionSource::Boleto => "BOLETO",
            TransactionSource::Other => "OTHER",
        }
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_named(s, "transaction type")
    }
}

impl FromStr for TransactionSubtype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_named(s, "transaction subtype")
    }
}

impl FromStr for TransactionSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_named(s, "transaction source")
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TransactionSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Share of a transaction attributed to a counterparty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub counterparty_id: i64,
    pub percentage: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A fully resolved transaction that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    pub owner_id: i64,
    pub description: String,
    /// Calendar date in the import's time zone
    pub transaction_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
    /// Always non-negative; direction lives in `transaction_type`
    pub amount: Decimal,
    pub category_id: i64,
    pub subcategory_id: Option<i64>,
    pub counter_account_id: Option<i64>,
    pub transaction_type: TransactionType,
    pub subtype: Option<TransactionSubtype>,
    pub source: Option<TransactionSource>,
    pub external_ref: Option<String>,
    pub allocations: Vec<Allocation>,
}

impl TransactionDraft {
    /// Check the invariants every store enforces before persisting
    pub fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(Error::validation("Description must not be blank"));
        }
        if self.amount < Decimal::ZERO {
            return Err(Error::validation("Amount must not be negative"));
        }

        validate_allocations(&self.allocations)
    }
}

/// Each share must be within (0, 100] and all shares together at most 100%
pub fn validate_allocations(allocations: &[Allocation]) -> Result<()> {
    let mut total = Decimal::ZERO;
    for allocation in allocations {
        if allocation.percentage <= Decimal::ZERO || allocation.percentage > Decimal::ONE_HUNDRED {
            return Err(Error::validation(format!(
                "Allocation percentage for counterparty {} must be within (0, 100]",
                allocation.counterparty_id
            )));
        }
        total += allocation.percentage;
    }
    if total > Decimal::ONE_HUNDRED {
        return Err(Error::validation(format!(
            "Allocations add up to {}%, more than 100%",
            total
        )));
    }

    Ok(())
}

/// A persisted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub owner_id: i64,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
    pub amount: Decimal,
    pub category_id: i64,
    pub subcategory_id: Option<i64>,
    pub counter_account_id: Option<i64>,
    pub transaction_type: TransactionType,
    pub subtype: Option<TransactionSubtype>,
    pub source: Option<TransactionSource>,
    pub external_ref: Option<String>,
    pub allocations: Vec<Allocation>,
    /// Which import batch created this transaction
    pub import_batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build the record a store persists for `draft`
    pub fn from_draft(draft: &TransactionDraft, import_batch_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: draft.owner_id,
            description: draft.description.clone(),
            transaction_date: draft.transaction_date,
            occurred_at: draft.occurred_at,
            amount: draft.amount,
            category_id: draft.category_id,
            subcategory_id: draft.subcategory_id,
            counter_account_id: draft.counter_account_id,
            transaction_type: draft.transaction_type,
            subtype: draft.subtype,
            source: draft.source,
            external_ref: draft.external_ref.clone(),
            allocations: draft.allocations.clone(),
            import_batch_id: import_batch_id.map(|s| s.to_string()),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_draft() -> TransactionDraft {
        TransactionDraft {
            owner_id: 1,
            description: "Groceries".to_string(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap(),
            amount: Decimal::new(4590, 2),
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

    #[test]
    fn test_named_variant_matching_is_case_insensitive() {
        assert_eq!(TransactionType::from_name(" expense "), Some(TransactionType::Expense));
        assert_eq!(
            TransactionSource::from_name("bank_transfer"),
            Some(TransactionSource::BankTransfer)
        );
        assert_eq!(TransactionSubtype::from_name("monthly"), None);
        assert!("refund".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_type_from_sign() {
        assert_eq!(TransactionType::from_sign(Decimal::new(-1, 0)), Some(TransactionType::Expense));
        assert_eq!(TransactionType::from_sign(Decimal::new(1, 0)), Some(TransactionType::Income));
        assert_eq!(TransactionType::from_sign(Decimal::ZERO), None);
    }

    #[test]
    fn test_enum_serde_names() {
        let json = serde_json::to_string(&TransactionSource::DebitCard).unwrap();
        assert_eq!(json, "\"DEBIT_CARD\"");
        let parsed: TransactionType = serde_json::from_str("\"INCOME\"").unwrap();
        assert_eq!(parsed, TransactionType::Income);
    }

    #[test]
    fn test_draft_validation() {
        assert!(sample_draft().validate().is_ok());

        let mut blank = sample_draft();
        blank.description = "   ".to_string();
        assert!(matches!(blank.validate(), Err(Error::Validation(_))));

        let mut zero = sample_draft();
        zero.amount = Decimal::ZERO;
        assert!(zero.validate().is_ok());

        let mut negative = sample_draft();
        negative.amount = Decimal::new(-100, 2);
        assert!(matches!(negative.validate(), Err(Error::Validation(_))));

        let mut over = sample_draft();
        over.allocations = vec![
            Allocation { counterparty_id: 2, percentage: Decimal::new(60, 0), note: None },
            Allocation { counterparty_id: 3, percentage: Decimal::new(50, 0), note: None },
        ];
        assert!(over.validate().is_err());
    }

    #[test]
    fn test_from_draft_copies_every_field() {
        let draft = sample_draft();
        let tx = Transaction::from_draft(&draft, Some("import_1"));
        assert_eq!(tx.owner_id, draft.owner_id);
        assert_eq!(tx.amount, draft.amount);
        assert_eq!(tx.transaction_date, draft.transaction_date);
        assert_eq!(tx.category_id, draft.category_id);
        assert_eq!(tx.import_batch_id.as_deref(), Some("import_1"));
    }
}
