//! Picks the grammar an upload is parsed with

use std::path::Path;

use crate::domain::result::{Error, Result};
use crate::domain::{FormatHint, StatementFormat};

/// Resolve the statement grammar
///
/// An explicit hint wins, then the file extension, then the declared content
/// type. Failing all three is a configuration error.
pub fn resolve_format(
    hint: FormatHint,
    file_name: Option<&str>,
    content_type: Option<&str>,
) -> Result<StatementFormat> {
    match hint {
        FormatHint::Csv => return Ok(StatementFormat::Delimited),
        FormatHint::Ofx => return Ok(StatementFormat::ExchangeFormat),
        FormatHint::Auto => {}
    }

    if let Some(format) = file_name.and_then(from_extension) {
        return Ok(format);
    }
    if let Some(format) = content_type.and_then(from_content_type) {
        return Ok(format);
    }

    Err(Error::config(format!(
        "Cannot determine statement format (file: {}, content type: {}); pass an explicit format",
        file_name.unwrap_or("<none>"),
        content_type.unwrap_or("<none>")
    )))
}

fn from_extension(file_name: &str) -> Option<StatementFormat> {
    let ext = Path::new(file_name.trim())
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match ext.as_str() {
        "csv" | "tsv" | "txt" => Some(StatementFormat::Delimited),
        "ofx" | "qfx" => Some(StatementFormat::ExchangeFormat),
        _ => None,
    }
}

fn from_content_type(content_type: &str) -> Option<StatementFormat> {
    let content_type = content_type.to_ascii_lowercase();
    if ["csv", "comma-separated-values", "tab-separated-values"]
        .iter()
        .any(|needle| content_type.contains(needle))
    {
        Some(StatementFormat::Delimited)
    } else if content_type.contains("ofx") || content_type.contains("qfx") {
        Some(StatementFormat::ExchangeFormat)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_hint_wins() {
        let format =
            resolve_format(FormatHint::Ofx, Some("statement.csv"), Some("text/csv")).unwrap();
        assert_eq!(format, StatementFormat::ExchangeFormat);
    }

    #[test]
    fn test_extension_before_content_type() {
        let format =
            resolve_format(FormatHint::Auto, Some("Extrato.QFX"), Some("text/csv")).unwrap();
        assert_eq!(format, StatementFormat::ExchangeFormat);

        let format = resolve_format(FormatHint::Auto, Some("export.tsv"), None).unwrap();
        assert_eq!(format, StatementFormat::Delimited);
    }

    #[test]
    fn test_content_type_fallback() {
        let format =
            resolve_format(FormatHint::Auto, Some("upload"), Some("Application/X-OFX")).unwrap();
        assert_eq!(format, StatementFormat::ExchangeFormat);

        let format =
            resolve_format(FormatHint::Auto, None, Some("text/tab-separated-values")).unwrap();
        assert_eq!(format, StatementFormat::Delimited);
    }

    #[test]
    fn test_unresolvable_is_config_error() {
        let result = resolve_format(
            FormatHint::Auto,
            Some("statement.pdf"),
            Some("application/pdf"),
        );
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(resolve_format(FormatHint::Auto, None, None).is_err());
    }
}
