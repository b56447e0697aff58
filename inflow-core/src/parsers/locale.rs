//! Locale-sensitive amount and date parsing shared by the statement grammars

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use rust_decimal::Decimal;

use crate::domain::result::{Error, Result};
use crate::domain::CsvFormat;

/// Languages that write `1.234,56` (or `1 234,56`)
const COMMA_DECIMAL_LANGUAGES: &[&str] = &[
    "pt", "de", "es", "fr", "it", "nl", "ru", "pl", "tr", "sv", "da", "nb", "fi", "cs", "id",
];

/// Comma-decimal languages that group thousands with a space
const SPACE_GROUPING_LANGUAGES: &[&str] = &["fr", "ru", "pl", "sv", "nb", "fi", "cs"];

fn language(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Decimal and grouping separators used by a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberConventions {
    pub decimal: char,
    pub grouping: Option<char>,
}

impl NumberConventions {
    /// Separators conventionally used for `locale`
    pub fn for_locale(locale: &str) -> Self {
        let lang = language(locale);
        if COMMA_DECIMAL_LANGUAGES.contains(&lang.as_str()) {
            let grouping = if SPACE_GROUPING_LANGUAGES.contains(&lang.as_str()) {
                ' '
            } else {
                '.'
            };
            Self {
                decimal: ',',
                grouping: Some(grouping),
            }
        } else {
            Self {
                decimal: '.',
                grouping: Some(','),
            }
        }
    }

    /// Explicit separators win over the locale defaults
    pub fn resolve(format: &CsvFormat) -> Result<Self> {
        let locale_default = Self::for_locale(&format.locale);
        let decimal = format.decimal_separator.unwrap_or(locale_default.decimal);
        let grouping = match format.grouping_separator {
            Some(g) => Some(g),
            // A locale's grouping char can't double as an explicit decimal separator
            None => locale_default.grouping.filter(|g| *g != decimal),
        };

        if grouping == Some(decimal) {
            return Err(Error::config(format!(
                "Decimal and grouping separators must differ (both '{}')",
                decimal
            )));
        }
        if decimal.is_ascii_digit() || decimal == '-' || decimal == '+' {
            return Err(Error::config(format!("Invalid decimal separator '{}'", decimal)));
        }

        Ok(Self { decimal, grouping })
    }
}

fn is_currency_or_space(c: char) -> bool {
    c.is_whitespace()
        || c.is_alphabetic()
        || matches!(c, '$' | '€' | '£' | '¥' | '₹' | '₩' | '¢')
}

/// Parse a statement amount into a signed decimal
///
/// Accepts `(50.00)` for negatives, a leading or trailing `-`, a leading or
/// trailing `+`, currency symbols around the number, and the configured
/// grouping/decimal separators.
pub fn parse_amount(
    raw: &str,
    conventions: &NumberConventions,
) -> std::result::Result<Decimal, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("Amount is blank".to_string());
    }

    let mut negative = false;
    let mut body = trimmed;
    if let Some(inner) = body.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        body = inner;
    }

    body = body.trim_matches(is_currency_or_space);
    if let Some(rest) = body.strip_suffix('-') {
        negative = true;
        body = rest;
    } else if let Some(rest) = body.strip_suffix('+') {
        body = rest;
    }
    if let Some(rest) = body.strip_prefix('-') {
        negative = true;
        body = rest;
    } else if let Some(rest) = body.strip_prefix('+') {
        body = rest;
    }
    body = body.trim_matches(is_currency_or_space);

    let mut canonical = String::with_capacity(body.len());
    for c in body.chars() {
        if c.is_whitespace() || Some(c) == conventions.grouping {
            continue;
        }
        if c == conventions.decimal {
            canonical.push('.');
        } else {
            canonical.push(c);
        }
    }

    let well_formed = canonical.chars().any(|c| c.is_ascii_digit())
        && canonical.chars().all(|c| c.is_ascii_digit() || c == '.')
        && canonical.matches('.').count() <= 1;
    if !well_formed {
        return Err(format!("Invalid amount '{}'", trimmed));
    }

    let value = Decimal::from_str(&canonical)
        .map_err(|e| format!("Invalid amount '{}': {}", trimmed, e))?;
    Ok(if negative { -value } else { value })
}

/// Date patterns tried when a statement configuration lists none
pub fn default_date_patterns(locale: &str) -> Vec<String> {
    let lang = language(locale);
    let region = locale
        .split(['-', '_'])
        .nth(1)
        .map(|r| r.trim().to_ascii_uppercase());

    let patterns: &[&str] = match (lang.as_str(), region.as_deref()) {
        ("en", None) | ("en", Some("US")) => &["MM/dd/yyyy", "yyyy-MM-dd", "MM-dd-yyyy"],
        ("ja", _) | ("zh", _) | ("ko", _) => &["yyyy-MM-dd", "yyyy/MM/dd", "yyyy.MM.dd"],
        _ => &["dd/MM/yyyy", "dd.MM.yyyy", "dd-MM-yyyy", "yyyy-MM-dd"],
    };
    patterns.iter().map(|p| p.to_string()).collect()
}

/// A date (or date-time) pattern compiled to chrono's format syntax
///
/// Patterns containing `%` are taken as strftime; anything else is read as a
/// Java-style pattern (`dd/MM/yyyy HH:mm`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    pub source: String,
    format: String,
    has_time: bool,
}

impl DatePattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(Error::config("Date pattern must not be blank"));
        }

        let format = if pattern.contains('%') {
            pattern.to_string()
        } else {
            translate_java_pattern(pattern)?
        };
        let has_time = ["%H", "%I", "%M", "%S", "%T", "%R", "%k", "%l"]
            .iter()
            .any(|spec| format.contains(spec));

        Ok(Self {
            source: pattern.to_string(),
            format,
            has_time,
        })
    }

    /// Parse `raw` as a local date-time in `tz`; the whole input must match
    pub fn parse(&self, raw: &str, tz: Tz) -> Option<DateTime<Tz>> {
        let raw = raw.trim();
        let naive = if self.has_time {
            NaiveDateTime::parse_from_str(raw, &self.format).ok()?
        } else {
            NaiveDate::parse_from_str(raw, &self.format)
                .ok()?
                .and_hms_opt(0, 0, 0)?
        };
        localize(naive, tz)
    }
}

/// Attach a time zone to a wall-clock time
///
/// Ambiguous times take the earlier instant; times inside a DST gap are
/// moved forward by an hour.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

fn translate_java_pattern(pattern: &str) -> Result<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            // Quoted literal; '' is an escaped quote
            let mut j = i + 1;
            if j < chars.len() && chars[j] == '\'' {
                out.push('\'');
                i += 2;
                continue;
            }
            while j < chars.len() && chars[j] != '\'' {
                push_literal(&mut out, chars[j]);
                j += 1;
            }
            i = j + 1;
            continue;
        }

        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        let spec = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) | ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) | ('d', 2) => "%d",
            ('H', 1) | ('H', 2) => "%H",
            ('h', 1) | ('h', 2) => "%I",
            ('m', 1) | ('m', 2) => "%M",
            ('s', 1) | ('s', 2) => "%S",
            ('S', n) if n <= 3 => "%3f",
            ('S', 6) => "%6f",
            ('S', 9) => "%9f",
            ('a', 1) => "%p",
            ('E', n) if n <= 3 => "%a",
            ('E', _) => "%A",
            _ => {
                return Err(Error::config(format!(
                    "Unsupported date pattern token '{}' in '{}'",
                    chars[i..i + run].iter().collect::<String>(),
                    pattern
                )))
            }
        };
        out.push_str(spec);
        i += run;
    }

    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
