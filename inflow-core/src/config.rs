//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "defaults": { "timeZone": "America/Sao_Paulo", "duplicatePolicy": "SKIP" },
//!   "importProfiles": { "nubank": { "csv": { ... }, "mappings": { ... } } }
//! }
//! ```
//! Keys this crate does not manage are preserved when saving.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::result::Result;
use crate::domain::{
    CsvFormat, DuplicatePolicy, FormatHint, ImportRequest, MappingTables, TransactionSource,
    TransactionSubtype, TransactionType,
};

/// Environment variable overriding `defaults.timeZone`
pub const TIME_ZONE_ENV: &str = "INFLOW_TIME_ZONE";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    defaults: ImportDefaults,
    #[serde(default)]
    import_profiles: HashMap<String, ImportProfile>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Request defaults applied before any profile or command-line flag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_policy: Option<DuplicatePolicy>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Inflow configuration (simplified view of settings)
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub defaults: ImportDefaults,
    pub import_profiles: HashMap<String, ImportProfile>,
}

impl Config {
    /// Load config from the data directory
    ///
    /// A missing or unreadable settings file yields the defaults. The time
    /// zone can be overridden with `INFLOW_TIME_ZONE`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let raw = read_settings(data_dir)?;

        let mut defaults = raw.defaults;
        if let Some(tz) = std::env::var(TIME_ZONE_ENV).ok().filter(|v| !v.trim().is_empty()) {
            defaults.time_zone = Some(tz);
        }

        Ok(Self {
            defaults,
            import_profiles: raw.import_profiles,
        })
    }

    /// Save the managed sections, keeping everything else in the file
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let mut settings = read_settings(data_dir)?;
        settings.defaults.time_zone = self.defaults.time_zone.clone();
        settings.defaults.duplicate_policy = self.defaults.duplicate_policy;
        settings.import_profiles = self.import_profiles.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(data_dir.join("settings.json"), content)?;
        Ok(())
    }

    /// A fresh request for `owner_id` carrying the configured defaults
    pub fn base_request(&self, owner_id: i64) -> ImportRequest {
        let mut request = ImportRequest::new(owner_id);
        if let Some(tz) = &self.defaults.time_zone {
            request.time_zone = tz.clone();
        }
        if let Some(policy) = self.defaults.duplicate_policy {
            request.duplicate_policy = policy;
        }
        request
    }

    pub fn profile(&self, name: &str) -> Option<&ImportProfile> {
        self.import_profiles.get(name)
    }

    pub fn save_profile(&mut self, name: impl Into<String>, profile: ImportProfile) {
        self.import_profiles.insert(name.into(), profile);
    }
}

fn read_settings(data_dir: &Path) -> Result<SettingsFile> {
    let settings_path = data_dir.join("settings.json");
    if !settings_path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(&settings_path)?;
    Ok(serde_json::from_str(&content).unwrap_or_default())
}

/// Saved import configuration for one bank's statements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatHint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv: Option<CsvFormat>,
    pub mappings: MappingTables,
    pub ignore_descriptions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_category_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_subcategory_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_counter_account_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_type: Option<TransactionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_subtype: Option<TransactionSubtype>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_source: Option<TransactionSource>,
}

impl ImportProfile {
    /// Capture the reusable parts of a request
    pub fn from_request(request: &ImportRequest) -> Self {
        Self {
            format: Some(request.format).filter(|f| *f != FormatHint::Auto),
            time_zone: Some(request.time_zone.clone()),
            csv: request.csv.clone(),
            mappings: request.mappings.clone(),
            ignore_descriptions: request.ignore_descriptions.clone(),
            default_category_id: request.default_category_id,
            default_subcategory_id: request.default_subcategory_id,
            default_counter_account_id: request.default_counter_account_id,
            default_type: request.default_type,
            default_subtype: request.default_subtype,
            default_source: request.default_source,
        }
    }

    /// Overlay the profile's settings onto `request`
    pub fn apply(&self, request: &mut ImportRequest) {
        if let Some(format) = self.format {
            request.format = format;
        }
        if let Some(tz) = &self.time_zone {
            request.time_zone = tz.clone();
        }
        if self.csv.is_some() {
            request.csv = self.csv.clone();
        }
        request.mappings = self.mappings.clone();
        request.ignore_descriptions = self.ignore_descriptions.clone();
        request.default_category_id = self.default_category_id.or(request.default_category_id);
        request.default_subcategory_id =
            self.default_subcategory_id.or(request.default_subcategory_id);
        request.default_counter_account_id = self
            .default_counter_account_id
            .or(request.default_counter_account_id);
        request.default_type = self.default_type.or(request.default_type);
        request.default_subtype = self.default_subtype.or(request.default_subtype);
        request.default_source = self.default_source.or(request.default_source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert!(config.import_profiles.is_empty());
        assert_eq!(config.base_request(1).duplicate_policy, DuplicatePolicy::Skip);
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"theme":"dark","defaults":{"duplicatePolicy":"ALLOW","currency":"BRL"}}"#,
        )
        .unwrap();

        let mut config = Config::load(dir.path()).unwrap();
        assert_eq!(config.defaults.duplicate_policy, Some(DuplicatePolicy::Allow));
        config.save_profile("nubank", ImportProfile::default());
        config.save(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(saved["theme"], "dark");
        assert_eq!(saved["defaults"]["currency"], "BRL");
        assert_eq!(saved["defaults"]["duplicatePolicy"], "ALLOW");
        assert!(saved["importProfiles"]["nubank"].is_object());
    }

    #[test]
    fn test_profile_round_trip_through_request() {
        let mut request = ImportRequest::new(3);
        request.time_zone = "America/Sao_Paulo".to_string();
        request.default_category_id = Some(5);
        request.ignore_descriptions = vec!["Saldo anterior".to_string()];
        request.csv = Some(CsvFormat {
            delimiter: ';',
            locale: "pt-BR".to_string(),
            ..CsvFormat::default()
        });
        request.mappings.category.insert("Mercado".to_string(), 9);

        let profile = ImportProfile::from_request(&request);
        assert_eq!(profile.format, None);

        let mut applied = ImportRequest::new(3);
        applied.default_subcategory_id = Some(11);
        profile.apply(&mut applied);
        assert_eq!(applied.time_zone, "America/Sao_Paulo");
        assert_eq!(applied.default_category_id, Some(5));
        assert_eq!(applied.default_subcategory_id, Some(11));
        assert_eq!(applied.csv, request.csv);
        assert_eq!(applied.mappings, request.mappings);
        assert_eq!(applied.ignore_descriptions, request.ignore_descriptions);
    }
}
