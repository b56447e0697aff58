//! OFX/QFX statement grammar (SGML 1.x and XML 2.x)

use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use chrono_tz::Tz;
use encoding_rs::WINDOWS_1252;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use super::locale::localize;
use super::resolve_with_fallback;
use crate::domain::result::{Error, Result};
use crate::domain::{ParsedEntry, TransactionSource};

#[derive(Deserialize, Debug)]
struct Document {
    #[serde(default)]
    bankmsgsrsv1: Option<BankMessages>,
    #[serde(default)]
    creditcardmsgsrsv1: Option<CardMessages>,
}

#[derive(Deserialize, Debug)]
struct BankMessages {
    #[serde(rename = "stmttrnrs", default)]
    responses: Vec<BankResponse>,
}

#[derive(Deserialize, Debug)]
struct BankResponse {
    #[serde(default)]
    stmtrs: Option<StmtRs>,
}

#[derive(Deserialize, Debug)]
struct CardMessages {
    #[serde(rename = "ccstmttrnrs", default)]
    responses: Vec<CardResponse>,
}

#[derive(Deserialize, Debug)]
struct CardResponse {
    #[serde(default)]
    ccstmtrs: Option<StmtRs>,
}

#[derive(Deserialize, Debug)]
struct StmtRs {
    #[serde(default)]
    banktranlist: Option<BankTranList>,
}

#[derive(Deserialize, Debug)]
struct BankTranList {
    #[serde(rename = "stmttrn", default)]
    stmttrns: Vec<StmtTrn>,
}

#[derive(Deserialize, Debug)]
struct StmtTrn {
    #[serde(default)]
    trntype: Option<String>,
    dtposted: String,
    trnamt: String,
    #[serde(default)]
    fitid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    payee: Option<Payee>,
    #[serde(default)]
    memo: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Payee {
    #[serde(default)]
    name: Option<String>,
}

/// Parser for OFX bank and credit-card statements
pub struct OfxStatementParser {
    time_zone: Tz,
}

impl OfxStatementParser {
    /// `time_zone` applies to dates without a bracketed offset
    pub fn new(time_zone: Tz) -> Self {
        Self { time_zone }
    }

    /// Parse the whole document; any malformed transaction fails it
    pub fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedEntry>> {
        let content = decode_document(bytes);
        let document = parse_document(extract_ofx_body(&content)?)?;

        let bank = document
            .bankmsgsrsv1
            .into_iter()
            .flat_map(|m| m.responses)
            .filter_map(|r| r.stmtrs)
            .map(|s| (s, TransactionSource::BankTransfer));
        let card = document
            .creditcardmsgsrsv1
            .into_iter()
            .flat_map(|m| m.responses)
            .filter_map(|r| r.ccstmtrs)
            .map(|s| (s, TransactionSource::CreditCard));

        let mut entries = Vec::new();
        for (statement, source) in bank.chain(card) {
            let Some(list) = statement.banktranlist else {
                continue;
            };

            let mut dated = list
                .stmttrns
                .into_iter()
                .map(|t| -> Result<(DateTime<Tz>, StmtTrn)> {
                    Ok((parse_ofx_datetime(&t.dtposted, self.time_zone)?, t))
                })
                .collect::<Result<Vec<_>>>()?;
            dated.sort_by_key(|(posted, _)| *posted);

            for (posted, transaction) in dated {
                let line = entries.len() + 1;
                entries.push(to_entry(line, posted, transaction, source)?);
            }
        }

        Ok(entries)
    }
}

fn to_entry(
    line: usize,
    posted: DateTime<Tz>,
    transaction: StmtTrn,
    source: TransactionSource,
) -> Result<ParsedEntry> {
    let amount = parse_ofx_amount(&transaction.trnamt).ok_or_else(|| {
        Error::parse(format!(
            "Invalid <TRNAMT> '{}' in transaction {}",
            transaction.trnamt.trim(),
            line
        ))
    })?;

    let memo = transaction
        .memo
        .as_deref()
        .map(sanitize)
        .filter(|m| !m.is_empty());
    let payee = transaction
        .name
        .as_deref()
        .or(transaction.payee.as_ref().and_then(|p| p.name.as_deref()))
        .map(sanitize)
        .filter(|p| !p.is_empty());

    Ok(ParsedEntry {
        line,
        external_ref: transaction
            .fitid
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty()),
        date_time: posted,
        description: memo.or(payee).unwrap_or_default(),
        amount,
        transaction_type: Some(resolve_with_fallback(transaction.trntype.as_deref(), amount)),
        subtype: None,
        source: Some(source),
        category: None,
        subcategory: None,
        counter_account: None,
    })
}

fn decode_document(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
        // OFX 1.x files commonly declare CHARSET:1252
        Err(_) => WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// Skip the `OFXHEADER:`/`<?xml ?>` prologue
fn extract_ofx_body(content: &str) -> Result<&str> {
    let upper = content.to_ascii_uppercase();
    upper
        .find("<OFX>")
        .map(|idx| &content[idx..])
        .ok_or_else(|| Error::parse("Not an OFX document: missing <OFX> root element"))
}

fn parse_document(body: &str) -> Result<Document> {
    let malformed =
        |e: &dyn std::fmt::Display| Error::parse(format!("Malformed OFX document: {}", e));

    let sgml = sgmlish::Parser::builder()
        .lowercase_names()
        .expand_entities(|entity| match entity {
            "lt" => Some("<"),
            "gt" => Some(">"),
            "amp" => Some("&"),
            "nbsp" => Some(" "),
            _ => None,
        })
        .parse(body)
        .map_err(|e| malformed(&e))?;
    let sgml = sgmlish::transforms::normalize_end_tags(sgml).map_err(|e| malformed(&e))?;
    sgmlish::from_fragment::<Document>(sgml).map_err(|e| malformed(&e))
}

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\p{Cc}]+").expect("valid regex"))
}

/// Drop control characters and collapse whitespace
fn sanitize(raw: &str) -> String {
    whitespace_run().replace_all(raw, " ").trim().to_string()
}

/// Signed amount rounded half-up to cents
fn parse_ofx_amount(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    // Some banks emit a comma decimal separator
    let normalized = if raw.contains('.') {
        raw.to_string()
    } else {
        raw.replace(',', ".")
    };
    let value = Decimal::from_str(normalized.trim_start_matches('+')).ok()?;
    Some(value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Parse `YYYYMMDD[HHMMSS[.XXX]][[offset:TZ]]`
fn parse_ofx_datetime(raw: &str, tz: Tz) -> Result<DateTime<Tz>> {
    let raw = raw.trim();
    let invalid = || Error::parse(format!("Invalid OFX date '{}'", raw));

    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 {
        return Err(invalid());
    }

    let field = |range: std::ops::Range<usize>| digits[range].parse::<u32>().map_err(|_| invalid());
    let year = digits[0..4].parse::<i32>().map_err(|_| invalid())?;
    let date = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?).ok_or_else(invalid)?;
    let naive = if digits.len() >= 14 {
        date.and_hms_opt(field(8..10)?, field(10..12)?, field(12..14)?)
    } else if digits.len() >= 12 {
        date.and_hms_opt(field(8..10)?, field(10..12)?, 0)
    } else {
        date.and_hms_opt(0, 0, 0)
    }
    .ok_or_else(invalid)?;

    if let Some(offset) = bracketed_offset(raw) {
        let offset = FixedOffset::east_opt(offset).ok_or_else(invalid)?;
        let instant = offset.from_local_datetime(&naive).single().ok_or_else(invalid)?;
        return Ok(instant.with_timezone(&tz));
    }

    localize(naive, tz).ok_or_else(invalid)
}

/// Seconds east of UTC from a `[-5:EST]` / `[+0530]` suffix
fn bracketed_offset(raw: &str) -> Option<i32> {
    let open = raw.find('[')?;
    let close = raw[open + 1..].find(']')?;
    let inner = &raw[open + 1..open + 1 + close];
    let part = inner.split(':').next().unwrap_or(inner).trim();

    let sign = if part.starts_with('-') { -1 } else { 1 };
    let unsigned = part.trim_start_matches(['+', '-']);
    let (hours, minutes) = match unsigned.split_once('.') {
        // Fractional hours such as -3.5
        Some((h, frac)) => {
            let h: i32 = h.parse().ok()?;
            let frac: f64 = format!("0.{}", frac).parse().ok()?;
            (h, (frac * 60.0).round() as i32)
        }
        None if unsigned.len() <= 2 => (unsigned.parse().ok()?, 0),
        None if unsigned.len() == 4 => (unsigned[0..2].parse().ok()?, unsigned[2..4].parse().ok()?),
        None => return None,
    };

    Some(sign * (hours * 3600 + minutes * 60))
}
