//! Statement import request and result types

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};
use crate::domain::transaction::{
    Allocation, Transaction, TransactionSource, TransactionSubtype, TransactionType,
};

/// What to do with an entry that looks like an already stored transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicatePolicy {
    #[default]
    Skip,
    Allow,
}

impl FromStr for DuplicatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(DuplicatePolicy::Skip),
            "allow" => Ok(DuplicatePolicy::Allow),
            other => Err(Error::config(format!(
                "Unknown duplicate policy '{}' (expected skip or allow)",
                other
            ))),
        }
    }
}

/// Caller's hint about the uploaded file's grammar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormatHint {
    #[default]
    Auto,
    Csv,
    Ofx,
}

impl FromStr for FormatHint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(FormatHint::Auto),
            "csv" => Ok(FormatHint::Csv),
            "ofx" | "qfx" => Ok(FormatHint::Ofx),
            other => Err(Error::config(format!("Unknown statement format '{}'", other))),
        }
    }
}

/// Grammar an upload is parsed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementFormat {
    #[serde(rename = "CSV")]
    Delimited,
    #[serde(rename = "OFX")]
    ExchangeFormat,
}

impl fmt::Display for StatementFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementFormat::Delimited => f.write_str("CSV"),
            StatementFormat::ExchangeFormat => f.write_str("OFX"),
        }
    }
}

/// Column names the delimited grammar reads each field from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColumnBindings {
    pub date: String,
    pub description: String,
    pub amount: String,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub subtype: String,
    pub source: String,
    pub category: String,
    pub subcategory: String,
    pub counter_account: String,
    pub external_id: String,
}

impl Default for ColumnBindings {
    fn default() -> Self {
        Self {
            date: "date".to_string(),
            description: "description".to_string(),
            amount: "amount".to_string(),
            transaction_type: "type".to_string(),
            subtype: "subtype".to_string(),
            source: "source".to_string(),
            category: "category".to_string(),
            subcategory: "subcategory".to_string(),
            counter_account: "counterAccount".to_string(),
            external_id: "externalId".to_string(),
        }
    }
}

/// Delimited-grammar configuration block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CsvFormat {
    /// Whether the first record of the file is a header row
    pub has_header: bool,
    /// Declared header names; required when the file has no header row
    pub header: Option<Vec<String>>,
    pub delimiter: char,
    pub quote: char,
    /// Encoding label (e.g. `UTF-8`, `ISO-8859-1`, `windows-1252`)
    pub charset: String,
    /// BCP-47 tag such as `pt-BR`; drives separator and date defaults
    pub locale: String,
    pub decimal_separator: Option<char>,
    pub grouping_separator: Option<char>,
    /// Tried in order; empty means "derive from locale"
    pub date_patterns: Vec<String>,
    pub columns: ColumnBindings,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            has_header: true,
            header: None,
            delimiter: ',',
            quote: '"',
            charset: "UTF-8".to_string(),
            locale: "en-US".to_string(),
            decimal_separator: None,
            grouping_separator: None,
            date_patterns: Vec::new(),
            columns: ColumnBindings::default(),
        }
    }
}

/// Caller-supplied value → id / enum tables, keyed by raw statement text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MappingTables {
    pub category: HashMap<String, i64>,
    pub subcategory: HashMap<String, i64>,
    pub counter_account: HashMap<String, i64>,
    #[serde(rename = "type")]
    pub transaction_type: HashMap<String, TransactionType>,
    pub subtype: HashMap<String, TransactionSubtype>,
    pub source: HashMap<String, TransactionSource>,
}

/// Everything an import call needs besides the file itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub owner_id: i64,
    #[serde(default)]
    pub default_category_id: Option<i64>,
    #[serde(default)]
    pub default_subcategory_id: Option<i64>,
    #[serde(default)]
    pub default_counter_account_id: Option<i64>,
    #[serde(default)]
    pub default_type: Option<TransactionType>,
    #[serde(default)]
    pub default_subtype: Option<TransactionSubtype>,
    #[serde(default)]
    pub default_source: Option<TransactionSource>,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default)]
    pub format: FormatHint,
    #[serde(default)]
    pub mappings: MappingTables,
    #[serde(default)]
    pub ignore_descriptions: Vec<String>,
    #[serde(default)]
    pub allocations: Vec<Allocation>,
    #[serde(default)]
    pub csv: Option<CsvFormat>,
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

impl ImportRequest {
    /// Request with no defaults, mappings or format configuration
    pub fn new(owner_id: i64) -> Self {
        Self {
            owner_id,
            default_category_id: None,
            default_subcategory_id: None,
            default_counter_account_id: None,
            default_type: None,
            default_subtype: None,
            default_source: None,
            duplicate_policy: DuplicatePolicy::Skip,
            dry_run: false,
            time_zone: default_time_zone(),
            format: FormatHint::Auto,
            mappings: MappingTables::default(),
            ignore_descriptions: Vec::new(),
            allocations: Vec::new(),
            csv: None,
        }
    }

    /// Resolve the IANA time zone name
    pub fn time_zone(&self) -> Result<Tz> {
        self.time_zone
            .trim()
            .parse::<Tz>()
            .map_err(|e| Error::config(format!("Unknown time zone '{}': {}", self.time_zone, e)))
    }

    /// Whether `description` is on the ignore-list (case-insensitive)
    pub fn is_ignored(&self, description: &str) -> bool {
        let description = description.trim().to_lowercase();
        self.ignore_descriptions
            .iter()
            .any(|ignored| ignored.trim().to_lowercase() == description)
    }
}

/// An uploaded statement: metadata plus the byte stream
pub struct StatementUpload<R: Read> {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub reader: R,
}

impl<R: Read> StatementUpload<R> {
    pub fn new(reader: R) -> Self {
        Self {
            file_name: None,
            content_type: None,
            reader,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One candidate transaction as read from the statement, before resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    /// 1-based data row (CSV) or running transaction number (OFX)
    pub line: usize,
    pub external_ref: Option<String>,
    pub date_time: DateTime<Tz>,
    pub description: String,
    /// Signed as it appeared in the statement
    pub amount: Decimal,
    pub transaction_type: Option<TransactionType>,
    pub subtype: Option<TransactionSubtype>,
    pub source: Option<TransactionSource>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub counter_account: Option<String>,
}

/// Why a line did not turn into a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    ParsingError,
    DuplicateSkipped,
    ConfigurationRejection,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::ParsingError => "PARSING_ERROR",
            IssueKind::DuplicateSkipped => "DUPLICATE_SKIPPED",
            IssueKind::ConfigurationRejection => "CONFIGURATION_REJECTION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    pub message: String,
    pub kind: IssueKind,
}

impl ImportIssue {
    pub fn new(
        line: usize,
        external_ref: Option<String>,
        message: impl Into<String>,
        kind: IssueKind,
    ) -> Self {
        Self {
            line,
            external_ref,
            message: message.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Unique batch ID for this import
    pub batch_id: String,
    pub format: StatementFormat,
    /// Whether this was a dry-run (nothing persisted)
    pub dry_run: bool,
    /// Entries read from the file, including ones that failed to parse
    pub total: usize,
    /// Entries that made it through every stage
    pub processed: usize,
    pub created: usize,
    /// Entries skipped as duplicates
    pub duplicates: usize,
    pub issues: Vec<ImportIssue>,
    /// Empty under dry-run
    pub transactions: Vec<Transaction>,
}

/// Bookkeeping record of one persisted import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub batch_id: String,
    pub owner_id: i64,
    pub file_name: Option<String>,
    /// SHA-256 of the uploaded bytes, hex encoded
    pub checksum: String,
    pub format: StatementFormat,
    pub total: usize,
    pub processed: usize,
    pub created: usize,
    pub duplicates: usize,
    pub issue_count: usize,
    pub imported_at: DateTime<Utc>,
}
