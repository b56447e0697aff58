//! Delimited (CSV/TSV) statement grammar

use std::collections::HashMap;

use chrono_tz::Tz;
use csv::{ReaderBuilder, StringRecord};
use encoding_rs::Encoding;

use super::locale::{default_date_patterns, parse_amount, DatePattern, NumberConventions};
use super::{resolve_strict, ParsedRow};
use crate::domain::result::{Error, Result};
use crate::domain::{
    ColumnBindings, CsvFormat, ImportIssue, IssueKind, ParsedEntry, TransactionSource,
    TransactionSubtype, TransactionType,
};

/// Decode `bytes` with the configured charset; a byte-order mark overrides it
pub(crate) fn decode(bytes: &[u8], charset: &str) -> Result<String> {
    let encoding = Encoding::for_label(charset.trim().as_bytes())
        .ok_or_else(|| Error::config(format!("Unsupported character set '{}'", charset)))?;
    let (text, _, _) = encoding.decode(bytes);
    Ok(text.into_owned())
}

fn header_key(name: &str) -> String {
    name.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Positions of the bound columns within a record
#[derive(Debug)]
struct ColumnIndex {
    date: usize,
    description: usize,
    amount: usize,
    transaction_type: Option<usize>,
    subtype: Option<usize>,
    source: Option<usize>,
    category: Option<usize>,
    subcategory: Option<usize>,
    counter_account: Option<usize>,
    external_id: Option<usize>,
}

impl ColumnIndex {
    fn build(names: &[String], bindings: &ColumnBindings) -> Result<Self> {
        let mut lookup: HashMap<String, usize> = HashMap::new();
        for (position, name) in names.iter().enumerate() {
            lookup.entry(header_key(name)).or_insert(position);
        }

        let required = |binding: &str| {
            lookup.get(&header_key(binding)).copied().ok_or_else(|| {
                Error::config(format!("Required column '{}' not found in header", binding))
            })
        };
        let optional = |binding: &str| lookup.get(&header_key(binding)).copied();

        Ok(Self {
            date: required(&bindings.date)?,
            description: required(&bindings.description)?,
            amount: required(&bindings.amount)?,
            transaction_type: optional(&bindings.transaction_type),
            subtype: optional(&bindings.subtype),
            source: optional(&bindings.source),
            category: optional(&bindings.category),
            subcategory: optional(&bindings.subcategory),
            counter_account: optional(&bindings.counter_account),
            external_id: optional(&bindings.external_id),
        })
    }
}

fn cell(record: &StringRecord, position: Option<usize>) -> Option<&str> {
    position
        .and_then(|p| record.get(p))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Parser for one delimited statement configuration
pub struct CsvStatementParser<'a> {
    format: &'a CsvFormat,
    time_zone: Tz,
    conventions: NumberConventions,
    patterns: Vec<DatePattern>,
}

impl<'a> CsvStatementParser<'a> {
    /// Validate the configuration up front so bad settings fail the batch
    pub fn new(format: &'a CsvFormat, time_zone: Tz) -> Result<Self> {
        for (what, c) in [("delimiter", format.delimiter), ("quote", format.quote)] {
            if !c.is_ascii() {
                return Err(Error::config(format!(
                    "CSV {} must be a single ASCII character, got '{}'",
                    what, c
                )));
            }
        }
        if format.delimiter == format.quote {
            return Err(Error::config("CSV delimiter and quote must differ"));
        }

        let conventions = NumberConventions::resolve(format)?;
        let sources = if format.date_patterns.is_empty() {
            default_date_patterns(&format.locale)
        } else {
            format.date_patterns.clone()
        };
        let patterns = sources
            .iter()
            .map(|p| DatePattern::compile(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            format,
            time_zone,
            conventions,
            patterns,
        })
    }

    /// Parse every data row, in file order
    pub fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedRow>> {
        let text = decode(bytes, &self.format.charset)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.format.delimiter as u8)
            .quote(self.format.quote as u8)
            .from_reader(text.as_bytes());
        let mut records = reader.records();

        let names: Vec<String> = if self.format.has_header {
            let header = records
                .next()
                .ok_or_else(|| Error::config("CSV statement is empty: no header row found"))?
                .map_err(|e| Error::parse(format!("Unreadable CSV header: {}", e)))?;
            let actual: Vec<String> = header.iter().map(|s| s.to_string()).collect();
            if let Some(declared) = &self.format.header {
                let present: Vec<String> = actual.iter().map(|n| header_key(n)).collect();
                let missing = declared.iter().find(|d| !present.contains(&header_key(d)));
                if let Some(missing) = missing {
                    return Err(Error::config(format!(
                        "Declared column '{}' not found in the file's header",
                        missing
                    )));
                }
            }
            actual
        } else {
            match &self.format.header {
                Some(declared) if !declared.is_empty() => declared.clone(),
                _ => {
                    return Err(Error::config(
                        "CSV has no header row and no header names were declared",
                    ))
                }
            }
        };
        let columns = ColumnIndex::build(&names, &self.format.columns)?;

        let mut rows = Vec::new();
        let mut line = 0;
        for record in records {
            match record {
                Ok(record) => {
                    line += 1;
                    let external_ref = cell(&record, columns.external_id).map(|s| s.to_string());
                    rows.push(self.parse_row(line, &record, &columns).map_err(|message| {
                        ImportIssue::new(line, external_ref, message, IssueKind::ParsingError)
                    }));
                }
                Err(e) => {
                    line += 1;
                    rows.push(Err(ImportIssue::new(
                        line,
                        None,
                        format!("Malformed record: {}", e),
                        IssueKind::ParsingError,
                    )));
                }
            }
        }

        Ok(rows)
    }

    fn parse_row(
        &self,
        line: usize,
        record: &StringRecord,
        columns: &ColumnIndex,
    ) -> std::result::Result<ParsedEntry, String> {
        let raw_date = cell(record, Some(columns.date)).ok_or("Date is blank")?;
        let date_time = self
            .patterns
            .iter()
            .find_map(|p| p.parse(raw_date, self.time_zone))
            .ok_or_else(|| {
                let tried: Vec<&str> = self.patterns.iter().map(|p| p.source.as_str()).collect();
                format!("Unparseable date '{}' (tried {})", raw_date, tried.join(", "))
            })?;

        let description = cell(record, Some(columns.description)).ok_or("Description is blank")?;

        let raw_amount = record.get(columns.amount).unwrap_or("");
        let amount = parse_amount(raw_amount, &self.conventions)?;

        let transaction_type =
            resolve_strict::<TransactionType>("type", cell(record, columns.transaction_type))?;
        let subtype =
            resolve_strict::<TransactionSubtype>("subtype", cell(record, columns.subtype))?;
        let source = resolve_strict::<TransactionSource>("source", cell(record, columns.source))?;

        Ok(ParsedEntry {
            line,
            external_ref: cell(record, columns.external_id).map(|s| s.to_string()),
            date_time,
            description: description.to_string(),
            amount,
            transaction_type,
            subtype,
            source,
            category: cell(record, columns.category).map(|s| s.to_string()),
            subcategory: cell(record, columns.subcategory).map(|s| s.to_string()),
            counter_account: cell(record, columns.counter_account).map(|s| s.to_string()),
        })
    }
}
