//! Statement grammars
//!
//! Each parser turns raw upload bytes into [`ParsedEntry`] values. Problems
//! confined to one row come back as an [`ImportIssue`] in that row's slot;
//! problems with the file as a whole come back as an `Err`.

mod delimited;
mod format;
pub mod locale;
mod ofx;

pub use delimited::CsvStatementParser;
pub use format::resolve_format;
pub use ofx::OfxStatementParser;

use rust_decimal::Decimal;

use crate::domain::{ImportIssue, NamedVariant, ParsedEntry, TransactionType};

/// Outcome of one statement row, kept in file order
pub type ParsedRow = std::result::Result<ParsedEntry, ImportIssue>;

/// Match a populated column against the enum's names
///
/// Blank cells resolve to `None`; anything else must name a variant.
pub fn resolve_strict<E: NamedVariant>(
    column: &str,
    raw: Option<&str>,
) -> std::result::Result<Option<E>, String> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    E::from_name(raw).map(Some).ok_or_else(|| {
        let names: Vec<&str> = E::ALL.iter().map(|v| v.as_str()).collect();
        format!(
            "Unrecognized {} '{}' (expected one of {})",
            column,
            raw,
            names.join(", ")
        )
    })
}

/// OFX `TRNTYPE` codes with a fixed direction
fn ofx_type_for_code(code: &str) -> Option<TransactionType> {
    match code.trim().to_ascii_uppercase().as_str() {
        "CREDIT" | "DEP" | "INT" | "DIV" | "DIRECTDEP" => Some(TransactionType::Income),
        "DEBIT" | "FEE" | "SRVCHG" | "ATM" | "POS" | "PAYMENT" | "CHECK" | "DIRECTDEBIT"
        | "REPEATPMT" | "CASH" => Some(TransactionType::Expense),
        _ => None,
    }
}

/// Direction of an OFX transaction: known code, else the amount's sign
pub fn resolve_with_fallback(code: Option<&str>, amount: Decimal) -> TransactionType {
    code.and_then(ofx_type_for_code).unwrap_or(if amount < Decimal::ZERO {
        TransactionType::Expense
    } else {
        TransactionType::Income
    })
}
