//! Entry normalization - turns a parsed statement entry into a transaction draft

use std::collections::HashMap;

use chrono::Utc;

use crate::domain::result::{Error, Result};
use crate::domain::{
    ImportRequest, MappingTables, ParsedEntry, TransactionDraft, TransactionSource,
    TransactionSubtype, TransactionType,
};

/// Canonical form of a mapping key: trimmed, lower-cased, inner whitespace collapsed
///
/// Blank input has no key and therefore never matches.
pub fn normalize_key(raw: &str) -> Option<String> {
    let key = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

fn index_table<T: Copy + PartialEq + std::fmt::Debug>(
    name: &str,
    table: &HashMap<String, T>,
) -> Result<HashMap<String, T>> {
    let mut index = HashMap::with_capacity(table.len());
    for (raw, value) in table {
        let Some(key) = normalize_key(raw) else {
            continue;
        };
        match index.get(&key) {
            Some(existing) if existing != value => {
                return Err(Error::config(format!(
                    "{} mapping has conflicting entries for '{}' ({:?} vs {:?})",
                    name, key, existing, value
                )));
            }
            _ => {
                index.insert(key, *value);
            }
        }
    }
    Ok(index)
}

fn lookup<T: Copy>(table: &HashMap<String, T>, raw: Option<&str>) -> Option<T> {
    raw.and_then(normalize_key).and_then(|k| table.get(&k).copied())
}

/// Request mapping tables keyed by [`normalize_key`]
#[derive(Debug, Default)]
pub struct MappingIndex {
    category: HashMap<String, i64>,
    subcategory: HashMap<String, i64>,
    counter_account: HashMap<String, i64>,
    transaction_type: HashMap<String, TransactionType>,
    subtype: HashMap<String, TransactionSubtype>,
    source: HashMap<String, TransactionSource>,
}

impl MappingIndex {
    /// Keys that only differ in case or spacing must agree on their value
    pub fn new(tables: &MappingTables) -> Result<Self> {
        Ok(Self {
            category: index_table("category", &tables.category)?,
            subcategory: index_table("subcategory", &tables.subcategory)?,
            counter_account: index_table("counterAccount", &tables.counter_account)?,
            transaction_type: index_table("type", &tables.transaction_type)?,
            subtype: index_table("subtype", &tables.subtype)?,
            source: index_table("source", &tables.source)?,
        })
    }
}

/// Resolve every field of `entry` into a validated draft
///
/// Precedence, per field:
/// - type: parser, type table (by category text), amount sign, request default
/// - subtype: parser, subtype table (by category text), request default
/// - source: parser, source table (by counter-account text), request default
/// - category: category table, request default
/// - subcategory / counter-account: their table, request default
pub fn normalize_entry(
    entry: &ParsedEntry,
    request: &ImportRequest,
    index: &MappingIndex,
) -> Result<TransactionDraft> {
    let category_text = entry.category.as_deref();
    let counter_text = entry.counter_account.as_deref();

    let transaction_type = entry
        .transaction_type
        .or_else(|| lookup(&index.transaction_type, category_text))
        .or_else(|| TransactionType::from_sign(entry.amount))
        .or(request.default_type)
        .ok_or_else(|| Error::validation("Cannot determine transaction type"))?;

    let subtype = entry
        .subtype
        .or_else(|| lookup(&index.subtype, category_text))
        .or(request.default_subtype);

    let source = entry
        .source
        .or_else(|| lookup(&index.source, counter_text))
        .or(request.default_source);

    let category_id = lookup(&index.category, category_text)
        .or(request.default_category_id)
        .ok_or_else(|| match category_text {
            Some(text) => Error::validation(format!(
                "Category '{}' is not mapped and no default category is set",
                text
            )),
            None => Error::validation("No category column value and no default category is set"),
        })?;

    let subcategory_id =
        lookup(&index.subcategory, entry.subcategory.as_deref()).or(request.default_subcategory_id);
    let counter_account_id =
        lookup(&index.counter_account, counter_text).or(request.default_counter_account_id);

    let draft = TransactionDraft {
        owner_id: request.owner_id,
        description: entry.description.trim().to_string(),
        transaction_date: entry.date_time.date_naive(),
        occurred_at: entry.date_time.with_timezone(&Utc),
        amount: entry.amount.abs(),
        category_id,
        subcategory_id,
        counter_account_id,
        transaction_type,
        subtype,
        source,
        external_ref: entry.external_ref.clone(),
        allocations: request.allocations.clone(),
    };
    draft.validate()?;

    Ok(draft)
}
