//! Integration tests for inflow-core import services
//!
//! These tests run whole statement imports against a real DuckDB file.
//! The in-memory store is used where a test needs to observe store calls.
//!
//! Run with: cargo test --test integration_tests -- --nocapture

use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

use rust_decimal::Decimal;

use inflow_core::adapters::duckdb::DuckDbRepository;
use inflow_core::adapters::memory::MemoryRepository;
use inflow_core::config::{Config, ImportProfile};
use inflow_core::domain::{
    CsvFormat, DuplicatePolicy, ImportRequest, IssueKind, StatementFormat, StatementUpload,
    TransactionSource, TransactionType,
};
use inflow_core::services::{EntryPoint, ImportService, LogLevel, LoggingService};
use inflow_core::{Error, ImportResult, InflowContext, TransactionStore};

// ============================================================================
// Test Helpers
// ============================================================================

/// Create a test repository with schema initialized
fn create_test_repo(temp_dir: &TempDir) -> Arc<DuckDbRepository> {
    let db_path = temp_dir.path().join("test.duckdb");
    let repo = DuckDbRepository::new(&db_path).expect("Failed to create repository");
    repo.ensure_schema().expect("Failed to initialize schema");
    Arc::new(repo)
}

/// The Brazilian bank export used by most scenarios
fn brazilian_request() -> ImportRequest {
    let mut request = ImportRequest::new(1);
    request.default_category_id = Some(5);
    request.time_zone = "America/Sao_Paulo".to_string();
    request.csv = Some(CsvFormat {
        delimiter: ';',
        locale: "pt-BR".to_string(),
        ..CsvFormat::default()
    });
    request
}

fn csv_upload(content: &[u8]) -> StatementUpload<Cursor<Vec<u8>>> {
    StatementUpload::new(Cursor::new(content.to_vec())).with_file_name("extrato.csv")
}

fn run_import(service: &ImportService, content: &[u8], request: &ImportRequest) -> ImportResult {
    service
        .import(csv_upload(content), request)
        .expect("Import should not fail as a whole")
}

fn issue_summary(result: &ImportResult) -> Vec<(usize, IssueKind)> {
    result.issues.iter().map(|i| (i.line, i.kind)).collect()
}

const MIXED_STATEMENT: &str = "date;description;amount;type;externalId\n\
    01/01/2024;Groceries;-45,90;;a1\n\
    02/01/2024;Salary;3.500,00;INCOME;a2\n\
    31/02/2024;Bad date;-1,00;;a3\n\
    03/01/2024;Bakery;-8,50;;a4\n\
    03/01/2024;Bakery;-8,50;;a5\n\
    04/01/2024;Mystery;-2,00;TRANSFER;a6\n\
    05/01/2024;Pharmacy;abc;;a7\n";

// ============================================================================
// Statement Scenarios
// ============================================================================

/// One semicolon-delimited pt-BR row becomes one expense
#[test]
fn test_single_brazilian_row_is_created() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo.clone());

    let result = run_import(
        &service,
        b"date;description;amount\n01/01/2024;Groceries;-45,90\n",
        &brazilian_request(),
    );

    assert_eq!(result.format, StatementFormat::Delimited);
    assert_eq!((result.total, result.processed, result.created), (1, 1, 1));
    assert!(result.issues.is_empty());

    let stored = repo.get_transactions(1).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].description, "Groceries");
    assert_eq!(stored[0].amount, Decimal::new(4590, 2));
    assert_eq!(stored[0].transaction_type, TransactionType::Expense);
    assert_eq!(stored[0].category_id, 5);
    assert_eq!(stored[0].transaction_date.to_string(), "2024-01-01");
    assert_eq!(stored[0].id, result.transactions[0].id);
}

/// Dry-run reports the same row as processed without storing anything
#[test]
fn test_dry_run_stores_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo.clone());
    let mut request = brazilian_request();
    request.dry_run = true;

    let result = run_import(
        &service,
        b"date;description;amount\n01/01/2024;Groceries;-45,90\n",
        &request,
    );

    assert_eq!(result.processed, 1);
    assert_eq!(result.created, 0);
    assert!(result.transactions.is_empty());
    assert_eq!(repo.count_transactions().unwrap(), 0);
    assert!(repo.list_import_batches(None, 10).unwrap().is_empty());
}

/// Two identical rows under SKIP: one created, one duplicate issue
#[test]
fn test_identical_rows_are_deduplicated() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo.clone());

    let result = run_import(
        &service,
        b"date;description;amount\n01/01/2024;Groceries;-45,90\n01/01/2024;Groceries;-45,90\n",
        &brazilian_request(),
    );

    assert_eq!(result.created, 1);
    assert_eq!(result.duplicates, 1);
    assert_eq!(issue_summary(&result), vec![(2, IssueKind::DuplicateSkipped)]);
    assert_eq!(repo.count_transactions().unwrap(), 1);
}

/// An unknown type value is a row error and not processed
#[test]
fn test_unrecognized_type_is_row_error() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo.clone());

    let result = run_import(
        &service,
        b"date;description;amount;type\n01/01/2024;Groceries;-45,90;TRANSFER\n",
        &brazilian_request(),
    );

    assert_eq!(result.total, 1);
    assert_eq!(result.processed, 0);
    assert_eq!(issue_summary(&result), vec![(1, IssueKind::ParsingError)]);
    assert!(result.issues[0].message.contains("TRANSFER"));
}

// ============================================================================
// Batch Properties
// ============================================================================

/// Every data row ends up as exactly one created record or one issue, in order
#[test]
fn test_every_row_accounted_for_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo);

    let result = run_import(&service, MIXED_STATEMENT.as_bytes(), &brazilian_request());

    assert_eq!(result.total, 7);
    assert_eq!(result.processed, 3);
    assert_eq!(result.created, 3);
    assert_eq!(result.duplicates, 1);
    assert_eq!(
        issue_summary(&result),
        vec![
            (3, IssueKind::ParsingError),
            (5, IssueKind::DuplicateSkipped),
            (6, IssueKind::ParsingError),
            (7, IssueKind::ParsingError),
        ]
    );
    assert_eq!(result.issues[0].external_ref.as_deref(), Some("a3"));

    let created: Vec<_> = result
        .transactions
        .iter()
        .map(|t| t.external_ref.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(created, vec!["a1", "a2", "a4"]);
    assert_eq!(result.processed + result.issues.len(), result.total);
}

/// Importing the same statement twice creates nothing the second time
#[test]
fn test_reimport_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo.clone());
    let request = brazilian_request();

    let first = run_import(&service, MIXED_STATEMENT.as_bytes(), &request);
    assert_eq!(first.created, 3);

    let second = run_import(&service, MIXED_STATEMENT.as_bytes(), &request);
    assert_eq!(second.created, 0);
    assert_eq!(second.processed, 0);
    assert_eq!(second.duplicates, 4);
    assert_eq!(repo.count_transactions().unwrap(), 3);
}

/// ALLOW keeps entries that look like duplicates
#[test]
fn test_allow_policy_imports_duplicates() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo.clone());
    let mut request = brazilian_request();

    run_import(&service, MIXED_STATEMENT.as_bytes(), &request);
    request.duplicate_policy = DuplicatePolicy::Allow;
    let second = run_import(&service, MIXED_STATEMENT.as_bytes(), &request);

    assert_eq!(second.created, 4);
    assert_eq!(second.duplicates, 0);
    assert_eq!(repo.count_transactions().unwrap(), 7);
}

/// Dry-run mirrors a real run except for created records
#[test]
fn test_dry_run_matches_real_run() {
    let real_dir = TempDir::new().unwrap();
    let real_service = ImportService::new(create_test_repo(&real_dir));
    let real = run_import(&real_service, MIXED_STATEMENT.as_bytes(), &brazilian_request());

    let memory = Arc::new(MemoryRepository::new());
    let dry_service = ImportService::new(memory.clone());
    let mut request = brazilian_request();
    request.dry_run = true;
    let dry = run_import(&dry_service, MIXED_STATEMENT.as_bytes(), &request);

    assert_eq!(dry.total, real.total);
    assert_eq!(dry.processed, real.processed);
    assert_eq!(dry.duplicates, real.duplicates);
    assert_eq!(dry.issues, real.issues);
    assert_eq!(dry.created, 0);
    assert!(dry.transactions.is_empty());
    assert_eq!(memory.create_calls(), 0);
}

/// A store rejection turns into a row issue while the batch continues
#[test]
fn test_store_rejection_does_not_stop_batch() {
    let memory = Arc::new(MemoryRepository::new().with_rejection(|draft| {
        (draft.description == "Salary").then(|| "Counter-account does not exist".to_string())
    }));
    let service = ImportService::new(memory.clone());

    let result = run_import(&service, MIXED_STATEMENT.as_bytes(), &brazilian_request());

    assert_eq!(result.created, 2);
    assert_eq!(result.processed, 2);
    let rejected = result.issues.iter().find(|i| i.line == 2).unwrap();
    assert_eq!(rejected.kind, IssueKind::ParsingError);
    assert_eq!(rejected.message, "Counter-account does not exist");
    assert_eq!(memory.transactions().len(), 2);
}

/// Ignored descriptions are configuration rejections, not duplicates
#[test]
fn test_ignore_list_rejects_rows() {
    let temp_dir = TempDir::new().unwrap();
    let service = ImportService::new(create_test_repo(&temp_dir));
    let mut request = brazilian_request();
    request.ignore_descriptions = vec!["saldo anterior".to_string(), "SALDO DO DIA".to_string()];

    let result = run_import(
        &service,
        "date;description;amount\n\
         01/01/2024;SALDO ANTERIOR;1.000,00\n\
         01/01/2024;Padaria;-8,00\n\
         01/01/2024;Saldo do dia;992,00\n"
            .as_bytes(),
        &request,
    );

    assert_eq!(result.total, 3);
    assert_eq!(result.created, 1);
    assert_eq!(result.duplicates, 0);
    assert_eq!(
        issue_summary(&result),
        vec![
            (1, IssueKind::ConfigurationRejection),
            (3, IssueKind::ConfigurationRejection),
        ]
    );
}

/// Mapping tables resolve category and type text ahead of the defaults
#[test]
fn test_mappings_resolve_columns() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo.clone());
    let mut request = brazilian_request();
    request.mappings.category.insert("Mercado".to_string(), 9);
    request
        .mappings
        .transaction_type
        .insert("Reembolso".to_string(), TransactionType::Income);
    request.mappings.counter_account.insert("Nubank".to_string(), 77);
    request
        .mappings
        .source
        .insert("nubank".to_string(), TransactionSource::Pix);

    let result = run_import(
        &service,
        "date;description;amount;category;counterAccount\n\
         01/01/2024;Feira;-30,00;MERCADO;Nubank\n\
         02/01/2024;Estorno;-12,00;reembolso;\n"
            .as_bytes(),
        &request,
    );

    assert_eq!(result.created, 2);
    let feira = &result.transactions[0];
    assert_eq!(feira.category_id, 9);
    assert_eq!(feira.counter_account_id, Some(77));
    assert_eq!(feira.source, Some(TransactionSource::Pix));
    let estorno = &result.transactions[1];
    assert_eq!(estorno.category_id, 5);
    assert_eq!(estorno.transaction_type, TransactionType::Income);
}

// ============================================================================
// Grammars and Encodings
// ============================================================================

/// Latin-1 exports decode before parsing
#[test]
fn test_latin1_statement() {
    let temp_dir = TempDir::new().unwrap();
    let service = ImportService::new(create_test_repo(&temp_dir));
    let mut request = brazilian_request();
    if let Some(csv) = request.csv.as_mut() {
        csv.charset = "ISO-8859-1".to_string();
    }

    let mut content = b"date;description;amount\n01/01/2024;Padaria S".to_vec();
    content.push(0xE3);
    content.extend_from_slice(b"o Jo");
    content.push(0xE3);
    content.extend_from_slice(b"o;-8,00\n");

    let result = run_import(&service, &content, &request);
    assert_eq!(result.created, 1);
    assert_eq!(result.transactions[0].description, "Padaria São João");
}

const OFX_STATEMENT: &str = r#"OFXHEADER:100
DATA:OFXSGML
VERSION:102
CHARSET:1252

<OFX>
<SIGNONMSGSRSV1><SONRS><STATUS><CODE>0<SEVERITY>INFO</STATUS><DTSERVER>20240131</SONRS></SIGNONMSGSRSV1>
<BANKMSGSRSV1>
<STMTTRNRS>
<TRNUID>1
<STATUS><CODE>0<SEVERITY>INFO</STATUS>
<STMTRS>
<CURDEF>BRL
<BANKTRANLIST>
<DTSTART>20240101
<DTEND>20240131
<STMTTRN>
<TRNTYPE>CREDIT
<DTPOSTED>20240115100000[-3:BRT]
<TRNAMT>3500.00
<FITID>bank-2
<NAME>EMPRESA LTDA
</STMTTRN>
<STMTTRN>
<TRNTYPE>DEBIT
<DTPOSTED>20240105
<TRNAMT>-45.90
<FITID>bank-1
<NAME>SUPERMERCADO
</STMTTRN>
</BANKTRANLIST>
</STMTRS>
</STMTTRNRS>
</BANKMSGSRSV1>
<CREDITCARDMSGSRSV1>
<CCSTMTTRNRS>
<TRNUID>2
<STATUS><CODE>0<SEVERITY>INFO</STATUS>
<CCSTMTRS>
<CURDEF>BRL
<BANKTRANLIST>
<STMTTRN>
<TRNTYPE>DEBIT
<DTPOSTED>20240110
<TRNAMT>-19.90
<FITID>card-1
<MEMO>Streaming subscription
</STMTTRN>
</BANKTRANLIST>
</CCSTMTRS>
</CCSTMTTRNRS>
</CREDITCARDMSGSRSV1>
</OFX>
"#;

/// OFX bank and card statements import in posting order per statement
#[test]
fn test_ofx_statement_import() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo.clone());
    let upload = StatementUpload::new(Cursor::new(OFX_STATEMENT.as_bytes().to_vec()))
        .with_file_name("extrato.ofx");

    let result = service.import(upload, &brazilian_request()).unwrap();

    assert_eq!(result.format, StatementFormat::ExchangeFormat);
    assert_eq!(result.created, 3);
    let refs: Vec<_> = result
        .transactions
        .iter()
        .map(|t| t.external_ref.clone().unwrap_or_default())
        .collect();
    assert_eq!(refs, vec!["bank-1", "bank-2", "card-1"]);

    let salary = &result.transactions[1];
    assert_eq!(salary.transaction_type, TransactionType::Income);
    assert_eq!(salary.source, Some(TransactionSource::BankTransfer));
    assert_eq!(salary.occurred_at.to_rfc3339(), "2024-01-15T13:00:00+00:00");

    let card = &result.transactions[2];
    assert_eq!(card.description, "Streaming subscription");
    assert_eq!(card.source, Some(TransactionSource::CreditCard));
    assert_eq!(card.amount, Decimal::new(1990, 2));

    // Same statement again: everything is a duplicate
    let upload = StatementUpload::new(Cursor::new(OFX_STATEMENT.as_bytes().to_vec()))
        .with_content_type("application/x-ofx");
    let again = service.import(upload, &brazilian_request()).unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.duplicates, 3);
}

/// A broken OFX document fails the whole import and stores nothing
#[test]
fn test_malformed_ofx_fails_batch() {
    let temp_dir = TempDir::new().unwrap();
    let repo = create_test_repo(&temp_dir);
    let service = ImportService::new(repo.clone());
    let broken = OFX_STATEMENT.replace("<TRNAMT>-45.90", "<TRNAMT>forty");
    let upload =
        StatementUpload::new(Cursor::new(broken.into_bytes())).with_file_name("extrato.qfx");

    let err = service.import(upload, &brazilian_request()).unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
    assert_eq!(repo.count_transactions().unwrap(), 0);
    assert!(repo.list_import_batches(None, 10).unwrap().is_empty());
}

/// Unknown file types are rejected before reading
#[test]
fn test_unresolvable_format_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let service = ImportService::new(create_test_repo(&temp_dir));
    let upload = StatementUpload::new(Cursor::new(b"%PDF-1.7".to_vec()))
        .with_file_name("statement.pdf")
        .with_content_type("application/pdf");

    let err = service.import(upload, &brazilian_request()).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

// ============================================================================
// Bookkeeping and Logging
// ============================================================================

/// Persisted imports are listed newest first with their checksum
#[test]
fn test_import_history() {
    let temp_dir = TempDir::new().unwrap();
    let service = ImportService::new(create_test_repo(&temp_dir));

    let first = run_import(&service, MIXED_STATEMENT.as_bytes(), &brazilian_request());
    let second = run_import(&service, MIXED_STATEMENT.as_bytes(), &brazilian_request());

    let history = service.history(Some(1), 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].checksum, history[1].checksum);
    assert_eq!(history[0].checksum.len(), 64);

    let by_id = |id: &str| history.iter().find(|b| b.batch_id == id).unwrap();
    assert_eq!(by_id(&first.batch_id).created, 3);
    assert_eq!(by_id(&second.batch_id).duplicates, 4);
    assert_eq!(by_id(&second.batch_id).issue_count, second.issues.len());
    assert!(service.history(Some(2), 10).unwrap().is_empty());
}

/// Import events land in the log database without statement content
#[test]
fn test_import_events_are_logged() {
    let temp_dir = TempDir::new().unwrap();
    let logger =
        Arc::new(LoggingService::new(temp_dir.path(), EntryPoint::Library, "test").unwrap());
    let service = ImportService::new(create_test_repo(&temp_dir)).with_logger(logger.clone());

    let result = run_import(&service, MIXED_STATEMENT.as_bytes(), &brazilian_request());

    let entries = logger.get_batch(&result.batch_id).unwrap();
    let events: Vec<_> = entries.iter().map(|e| e.event.as_str()).collect();
    assert!(events.contains(&"import_started"));
    assert!(events.contains(&"import_completed"));
    let rejected = events.iter().filter(|e| **e == "import_row_rejected").count();
    assert_eq!(rejected, result.issues.len());

    for entry in &entries {
        let detail = entry.detail.clone().unwrap_or_default();
        assert!(!detail.contains("Groceries"));
        assert!(!detail.contains("45,90"));
    }

    // Row rejections are debug-level and hidden from the default view
    let visible = logger.get_recent(100, LogLevel::Info).unwrap();
    assert!(visible.iter().all(|e| e.event != "import_row_rejected"));
}

/// Whole-batch failures are logged as errors
#[test]
fn test_failed_import_is_logged() {
    let temp_dir = TempDir::new().unwrap();
    let logger =
        Arc::new(LoggingService::new(temp_dir.path(), EntryPoint::Library, "test").unwrap());
    let service = ImportService::new(create_test_repo(&temp_dir)).with_logger(logger.clone());

    let mut request = brazilian_request();
    request.time_zone = "Atlantis/Lost".to_string();
    assert!(service
        .import(csv_upload(MIXED_STATEMENT.as_bytes()), &request)
        .is_err());

    let errors = logger.get_errors(10).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].event, "import_failed");
    assert_eq!(errors[0].detail.as_deref(), Some("kind=config"));
}

/// A context opened on a data directory imports with a saved profile
#[test]
fn test_context_with_saved_profile() {
    let temp_dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.save_profile("banco", ImportProfile::from_request(&brazilian_request()));
    config.save(temp_dir.path()).unwrap();

    let ctx = InflowContext::new(temp_dir.path(), EntryPoint::Library, "test").unwrap();
    let mut request = ctx.config.base_request(1);
    ctx.config.profile("banco").unwrap().apply(&mut request);

    let result = ctx
        .import_service
        .import(
            csv_upload(b"date;description;amount\n01/01/2024;Groceries;-45,90\n"),
            &request,
        )
        .unwrap();
    assert_eq!(result.created, 1);
    assert_eq!(ctx.repository.count_transactions().unwrap(), 1);
    assert!(ctx.logger.is_some());
}
