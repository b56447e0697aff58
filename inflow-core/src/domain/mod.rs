//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

pub mod import;
pub mod result;
mod transaction;

pub use import::{
    ColumnBindings, CsvFormat, DuplicatePolicy, FormatHint, ImportBatch, ImportIssue,
    ImportRequest, ImportResult, IssueKind, MappingTables, ParsedEntry, StatementFormat,
    StatementUpload,
};
pub use transaction::{
    validate_allocations, Allocation, NamedVariant, Transaction, TransactionDraft,
    TransactionSource, TransactionSubtype, TransactionType,
};
