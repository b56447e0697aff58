//! Import command - import transactions from a bank or card statement

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::{get_context, get_data_dir, log_event};
use crate::output;
use inflow_core::config::{Config, ImportProfile};
use inflow_core::domain::{
    CsvFormat, DuplicatePolicy, FormatHint, TransactionSource, TransactionSubtype, TransactionType,
};
use inflow_core::{ImportRequest, ImportResult, LogEvent, OperationResult, StatementUpload};

#[derive(Args)]
pub struct ImportArgs {
    /// Path to the statement file
    file: Option<PathBuf>,
    /// Load the whole import request from a JSON file
    #[arg(long)]
    request: Option<PathBuf>,
    /// Owner the transactions are imported for
    #[arg(long)]
    owner: Option<i64>,
    /// Use saved import profile
    #[arg(long)]
    profile: Option<String>,
    /// Save settings as profile
    #[arg(long)]
    save_profile: Option<String>,
    /// List saved profiles
    #[arg(long)]
    list_profiles: bool,
    /// Statement format (auto, csv, ofx)
    #[arg(long)]
    format: Option<FormatHint>,
    /// IANA time zone the statement dates are in
    #[arg(long)]
    time_zone: Option<String>,
    /// What to do with likely duplicates (skip, allow)
    #[arg(long)]
    duplicates: Option<DuplicatePolicy>,
    /// Parse and check everything without saving
    #[arg(long)]
    dry_run: bool,
    /// Category for entries without a mapped category
    #[arg(long)]
    default_category: Option<i64>,
    #[arg(long)]
    default_subcategory: Option<i64>,
    #[arg(long)]
    default_counter_account: Option<i64>,
    /// Type when neither a column nor the amount sign decides
    #[arg(long)]
    default_type: Option<TransactionType>,
    #[arg(long)]
    default_subtype: Option<TransactionSubtype>,
    #[arg(long)]
    default_source: Option<TransactionSource>,
    /// Skip entries with this description (repeatable)
    #[arg(long = "ignore")]
    ignore_descriptions: Vec<String>,
    /// CSV field delimiter
    #[arg(long)]
    delimiter: Option<char>,
    /// Locale for number and date conventions (e.g. pt-BR)
    #[arg(long)]
    locale: Option<String>,
    /// CSV character encoding (e.g. windows-1252)
    #[arg(long)]
    charset: Option<String>,
    #[arg(long)]
    decimal_separator: Option<char>,
    #[arg(long)]
    grouping_separator: Option<char>,
    /// Date pattern to try, in order (repeatable)
    #[arg(long = "date-pattern")]
    date_patterns: Vec<String>,
    /// The CSV has no header row; use --header for column names
    #[arg(long)]
    no_header: bool,
    /// Comma-separated column names for files without a header row
    #[arg(long, value_delimiter = ',')]
    header: Vec<String>,
    /// Column name for transaction date
    #[arg(long)]
    date_column: Option<String>,
    /// Column name for transaction description
    #[arg(long)]
    description_column: Option<String>,
    /// Column name for amount
    #[arg(long)]
    amount_column: Option<String>,
    /// Column name for category text
    #[arg(long)]
    category_column: Option<String>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

impl ImportArgs {
    fn touches_csv(&self) -> bool {
        self.delimiter.is_some()
            || self.locale.is_some()
            || self.charset.is_some()
            || self.decimal_separator.is_some()
            || self.grouping_separator.is_some()
            || !self.date_patterns.is_empty()
            || self.no_header
            || !self.header.is_empty()
            || self.date_column.is_some()
            || self.description_column.is_some()
            || self.amount_column.is_some()
            || self.category_column.is_some()
    }

    /// Command-line flags override everything loaded before them
    fn apply(&self, request: &mut ImportRequest) {
        if let Some(format) = self.format {
            request.format = format;
        }
        if let Some(tz) = &self.time_zone {
            request.time_zone = tz.clone();
        }
        if let Some(policy) = self.duplicates {
            request.duplicate_policy = policy;
        }
        if self.dry_run {
            request.dry_run = true;
        }
        request.default_category_id = self.default_category.or(request.default_category_id);
        request.default_subcategory_id =
            self.default_subcategory.or(request.default_subcategory_id);
        request.default_counter_account_id = self
            .default_counter_account
            .or(request.default_counter_account_id);
        request.default_type = self.default_type.or(request.default_type);
        request.default_subtype = self.default_subtype.or(request.default_subtype);
        request.default_source = self.default_source.or(request.default_source);
        request
            .ignore_descriptions
            .extend(self.ignore_descriptions.iter().cloned());

        if !self.touches_csv() {
            return;
        }
        let csv = request.csv.get_or_insert_with(CsvFormat::default);
        if let Some(delimiter) = self.delimiter {
            csv.delimiter = delimiter;
        }
        if let Some(locale) = &self.locale {
            csv.locale = locale.clone();
        }
        if let Some(charset) = &self.charset {
            csv.charset = charset.clone();
        }
        if self.decimal_separator.is_some() {
            csv.decimal_separator = self.decimal_separator;
        }
        if self.grouping_separator.is_some() {
            csv.grouping_separator = self.grouping_separator;
        }
        if !self.date_patterns.is_empty() {
            csv.date_patterns = self.date_patterns.clone();
        }
        if self.no_header {
            csv.has_header = false;
        }
        if !self.header.is_empty() {
            csv.header = Some(self.header.clone());
        }
        if let Some(col) = &self.date_column {
            csv.columns.date = col.clone();
        }
        if let Some(col) = &self.description_column {
            csv.columns.description = col.clone();
        }
        if let Some(col) = &self.amount_column {
            csv.columns.amount = col.clone();
        }
        if let Some(col) = &self.category_column {
            csv.columns.category = col.clone();
        }
    }
}

pub fn run(args: ImportArgs) -> Result<()> {
    let mut ctx = get_context()?;

    if args.list_profiles {
        return list_profiles(&ctx.config, args.json);
    }

    let file_path = args
        .file
        .clone()
        .ok_or_else(|| anyhow::anyhow!("File path required for import"))?;

    let mut request = build_request(&ctx.config, &args)?;
    args.apply(&mut request);

    if let Some(profile_name) = &args.save_profile {
        ctx.config
            .save_profile(profile_name.clone(), ImportProfile::from_request(&request));
        ctx.config.save(&get_data_dir()?)?;
        if !args.json {
            output::success(&format!("Profile '{}' saved", profile_name));
        }
    }

    log_event(
        &ctx.logger,
        LogEvent::new("command_executed").with_command("import"),
    );

    let upload = open_upload(&file_path)?;
    let outcome = ctx.import_service.import(upload, &request);

    if args.json {
        let result: OperationResult<ImportResult> = outcome.into();
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let result = outcome.with_context(|| format!("Import of {} failed", file_path.display()))?;
    if let Some(profile_name) = &args.profile {
        println!("Using profile '{}'", profile_name);
    }
    print_result(&result);
    Ok(())
}

fn build_request(config: &Config, args: &ImportArgs) -> Result<ImportRequest> {
    if let Some(path) = &args.request {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?;
        let mut request: ImportRequest = serde_json::from_str(&content)
            .with_context(|| format!("Invalid import request in {}", path.display()))?;
        if let Some(owner) = args.owner {
            request.owner_id = owner;
        }
        return Ok(request);
    }

    let owner = args
        .owner
        .ok_or_else(|| anyhow::anyhow!("--owner required for import (or pass --request)"))?;
    let mut request = config.base_request(owner);

    if let Some(profile_name) = &args.profile {
        let profile = config
            .profile(profile_name)
            .ok_or_else(|| anyhow::anyhow!("Profile not found: {}", profile_name))?;
        profile.apply(&mut request);
    }

    Ok(request)
}

fn open_upload(path: &Path) -> Result<StatementUpload<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut upload = StatementUpload::new(BufReader::new(file));
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        upload = upload.with_file_name(name);
    }
    Ok(upload)
}

fn list_profiles(config: &Config, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&config.import_profiles)?);
        return Ok(());
    }

    if config.import_profiles.is_empty() {
        println!("No saved profiles.");
        return Ok(());
    }

    let mut names: Vec<_> = config.import_profiles.keys().collect();
    names.sort();

    println!("Saved import profiles:");
    for name in names {
        let profile = &config.import_profiles[name];
        println!();
        println!("  {}", name.green());
        if let Some(tz) = &profile.time_zone {
            println!("    Time zone: {}", tz);
        }
        if let Some(csv) = &profile.csv {
            println!(
                "    CSV: delimiter '{}', locale {}, charset {}",
                csv.delimiter, csv.locale, csv.charset
            );
            println!(
                "    Columns: {} / {} / {}",
                csv.columns.date, csv.columns.description, csv.columns.amount
            );
        }
        if let Some(category) = profile.default_category_id {
            println!("    Default category: {}", category);
        }
        let mapped = profile.mappings.category.len() + profile.mappings.transaction_type.len();
        if mapped > 0 {
            println!("    Mappings: {}", mapped);
        }
        if !profile.ignore_descriptions.is_empty() {
            println!("    Ignored: {}", profile.ignore_descriptions.join(", "));
        }
    }
    Ok(())
}

fn print_result(result: &ImportResult) {
    if result.dry_run {
        output::warning("DRY RUN - No changes applied");
        println!();
    }

    println!("{} {} ({})", "Batch".bold(), result.batch_id, result.format);
    println!("  Entries:    {}", result.total);
    println!("  Processed:  {}", result.processed);
    println!("  Created:    {}", result.created);
    println!("  Duplicates: {}", result.duplicates);

    if !result.transactions.is_empty() {
        println!();
        let mut table = output::create_table();
        table.set_header(vec!["Date", "Type", "Amount", "Category", "Description"]);
        for tx in result.transactions.iter().take(10) {
            table.add_row(vec![
                tx.transaction_date.to_string(),
                tx.transaction_type.to_string(),
                tx.amount.to_string(),
                tx.category_id.to_string(),
                tx.description.clone(),
            ]);
        }
        println!("{}", table);
        if result.transactions.len() > 10 {
            println!("  ... and {} more", result.transactions.len() - 10);
        }
    }

    if !result.issues.is_empty() {
        println!();
        println!("{}", format!("{} issue(s):", result.issues.len()).yellow());
        let mut table = output::create_table();
        table.set_header(vec!["Line", "Kind", "Reference", "Message"]);
        for issue in &result.issues {
            table.add_row(vec![
                issue.line.to_string(),
                issue.kind.as_str().to_string(),
                issue.external_ref.clone().unwrap_or_else(|| "-".to_string()),
                issue.message.clone(),
            ]);
        }
        println!("{}", table);
    }

    println!();
    if result.dry_run {
        output::info(&format!("{} transaction(s) would be imported", result.processed));
    } else {
        output::success(&format!("Imported {} transaction(s)", result.created));
    }
}
