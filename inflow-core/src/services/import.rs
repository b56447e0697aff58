//! Import service - statement import orchestration
//!
//! Sequences format resolution, parsing, normalization, duplicate detection
//! and persistence for one uploaded statement. Problems confined to a single
//! entry become [`ImportIssue`]s and the batch carries on; configuration and
//! whole-file problems abort the import with an error.

use std::io::Read;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{
    validate_allocations, CsvFormat, DuplicatePolicy, ImportBatch, ImportIssue, ImportRequest,
    ImportResult, IssueKind, ParsedEntry, StatementFormat, StatementUpload, Transaction,
};
use crate::parsers::{resolve_format, CsvStatementParser, OfxStatementParser, ParsedRow};
use crate::ports::TransactionStore;
use crate::services::duplicate::DuplicateDetector;
use crate::services::logging::{LogEvent, LogLevel, LoggingService};
use crate::services::normalize::{normalize_entry, MappingIndex};

/// Running totals, issues and created records for one import
#[derive(Debug, Default)]
struct ImportAccumulator {
    total: usize,
    processed: usize,
    created: usize,
    duplicates: usize,
    issues: Vec<ImportIssue>,
    transactions: Vec<Transaction>,
}

impl ImportAccumulator {
    fn into_result(self, batch_id: String, format: StatementFormat, dry_run: bool) -> ImportResult {
        ImportResult {
            batch_id,
            format,
            dry_run,
            total: self.total,
            processed: self.processed,
            created: self.created,
            duplicates: self.duplicates,
            issues: self.issues,
            transactions: self.transactions,
        }
    }
}

/// Per-import state shared by every entry
struct ImportRun<'a> {
    batch_id: &'a str,
    request: &'a ImportRequest,
    index: MappingIndex,
    detector: DuplicateDetector<'a>,
}

/// Import service for bank and card statements
pub struct ImportService {
    store: Arc<dyn TransactionStore>,
    logger: Option<Arc<LoggingService>>,
}

impl ImportService {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store, logger: None }
    }

    /// Record import events in `logger`; logging failures are ignored
    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Previously persisted imports, newest first
    pub fn history(&self, owner_id: Option<i64>, limit: usize) -> Result<Vec<ImportBatch>> {
        self.store.list_import_batches(owner_id, limit)
    }

    /// Import one statement
    ///
    /// Returns `Err` only for whole-batch failures: unresolvable format, bad
    /// configuration, an unreadable stream or a malformed OFX document.
    pub fn import<R: Read>(
        &self,
        upload: StatementUpload<R>,
        request: &ImportRequest,
    ) -> Result<ImportResult> {
        let batch_id = generate_batch_id();
        self.log(
            LogEvent::new("import_started")
                .with_batch(&batch_id)
                .with_detail(format!("dry_run={}", request.dry_run)),
        );

        match self.run(&batch_id, upload, request) {
            Ok(result) => {
                self.log(
                    LogEvent::new("import_completed").with_batch(&batch_id).with_detail(format!(
                        "format={} total={} processed={} created={} duplicates={} issues={}",
                        result.format,
                        result.total,
                        result.processed,
                        result.created,
                        result.duplicates,
                        result.issues.len()
                    )),
                );
                Ok(result)
            }
            Err(e) => {
                self.log(
                    LogEvent::new("import_failed")
                        .with_batch(&batch_id)
                        .with_detail(format!("kind={}", e.kind()))
                        .with_error(e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn run<R: Read>(
        &self,
        batch_id: &str,
        upload: StatementUpload<R>,
        request: &ImportRequest,
    ) -> Result<ImportResult> {
        let StatementUpload {
            file_name,
            content_type,
            mut reader,
        } = upload;

        let format = resolve_format(request.format, file_name.as_deref(), content_type.as_deref())?;
        let time_zone = request.time_zone()?;
        let index = MappingIndex::new(&request.mappings)?;
        validate_allocations(&request.allocations).map_err(|e| Error::config(e.to_string()))?;

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        drop(reader);
        let checksum = hex::encode(Sha256::digest(&bytes));

        let rows = parse_rows(format, &bytes, request.csv.as_ref(), time_zone)?;

        let mut run = ImportRun {
            batch_id,
            request,
            index,
            detector: DuplicateDetector::new(self.store.as_ref(), time_zone),
        };
        let mut acc = ImportAccumulator {
            total: rows.len(),
            ..ImportAccumulator::default()
        };

        for row in rows {
            match row {
                Ok(entry) => self.process_entry(&mut run, entry, &mut acc),
                Err(issue) => self.reject(batch_id, issue, &mut acc),
            }
        }

        if !request.dry_run {
            let batch = ImportBatch {
                batch_id: batch_id.to_string(),
                owner_id: request.owner_id,
                file_name,
                checksum,
                format,
                total: acc.total,
                processed: acc.processed,
                created: acc.created,
                duplicates: acc.duplicates,
                issue_count: acc.issues.len(),
                imported_at: Utc::now(),
            };
            // The transactions are already stored; a bookkeeping failure must not hide them
            if let Err(e) = self.store.record_import_batch(&batch) {
                self.log(
                    LogEvent::new("import_batch_not_recorded")
                        .with_level(LogLevel::Warn)
                        .with_batch(batch_id)
                        .with_detail(format!("kind={}", e.kind())),
                );
            }
        }

        Ok(acc.into_result(batch_id.to_string(), format, request.dry_run))
    }

    fn process_entry(
        &self,
        run: &mut ImportRun<'_>,
        entry: ParsedEntry,
        acc: &mut ImportAccumulator,
    ) {
        let line = entry.line;
        let external_ref = entry.external_ref.clone();
        let issue = |message: String, kind: IssueKind| {
            ImportIssue::new(line, external_ref.clone(), message, kind)
        };

        if run.request.is_ignored(&entry.description) {
            let message = format!(
                "Description '{}' is on the ignore list",
                entry.description.trim()
            );
            self.reject(run.batch_id, issue(message, IssueKind::ConfigurationRejection), acc);
            return;
        }

        let draft = match normalize_entry(&entry, run.request, &run.index) {
            Ok(draft) => draft,
            Err(e) => {
                self.reject(run.batch_id, issue(error_message(&e), IssueKind::ParsingError), acc);
                return;
            }
        };

        if run.request.duplicate_policy == DuplicatePolicy::Skip {
            match run.detector.is_duplicate(&draft) {
                Ok(true) => {
                    acc.duplicates += 1;
                    let message = format!(
                        "Possible duplicate of an existing transaction on {}",
                        draft.transaction_date
                    );
                    self.reject(run.batch_id, issue(message, IssueKind::DuplicateSkipped), acc);
                    return;
                }
                Ok(false) => {}
                Err(e) => {
                    let rejected = issue(error_message(&e), IssueKind::ParsingError);
                    self.reject(run.batch_id, rejected, acc);
                    return;
                }
            }
        }

        if run.request.dry_run {
            acc.processed += 1;
            run.detector.accept(&draft);
            return;
        }

        match self.store.create_transaction(&draft, Some(run.batch_id)) {
            Ok(transaction) => {
                acc.processed += 1;
                acc.created += 1;
                acc.transactions.push(transaction);
                run.detector.accept(&draft);
            }
            Err(e) => {
                self.reject(run.batch_id, issue(error_message(&e), IssueKind::ParsingError), acc);
            }
        }
    }

    fn reject(&self, batch_id: &str, issue: ImportIssue, acc: &mut ImportAccumulator) {
        self.log(
            LogEvent::new("import_row_rejected")
                .with_level(LogLevel::Debug)
                .with_batch(batch_id)
                .with_detail(format!("line={} kind={}", issue.line, issue.kind.as_str())),
        );
        acc.issues.push(issue);
    }

    fn log(&self, event: LogEvent) {
        if let Some(logger) = &self.logger {
            let _ = logger.log(event);
        }
    }
}

fn parse_rows(
    format: StatementFormat,
    bytes: &[u8],
    csv: Option<&CsvFormat>,
    time_zone: Tz,
) -> Result<Vec<ParsedRow>> {
    match format {
        StatementFormat::Delimited => {
            let default_format;
            let csv = match csv {
                Some(csv) => csv,
                None => {
                    default_format = CsvFormat::default();
                    &default_format
                }
            };
            CsvStatementParser::new(csv, time_zone)?.parse(bytes)
        }
        StatementFormat::ExchangeFormat => Ok(OfxStatementParser::new(time_zone)
            .parse(bytes)?
            .into_iter()
            .map(Ok)
            .collect()),
    }
}

/// Issue text without the error-kind prefix
fn error_message(error: &Error) -> String {
    match error {
        Error::Validation(msg) | Error::Database(msg) | Error::Parse(msg) | Error::Config(msg) => {
            msg.clone()
        }
        other => other.to_string(),
    }
}

fn generate_batch_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("import_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryRepository;
    use crate::domain::{TransactionSource, TransactionType};
    use rust_decimal::Decimal;
    use std::io::Cursor;

    const SCENARIO_CSV: &str = "date;description;amount\n01/01/2024;Groceries;-45,90\n";

    fn pt_br_request() -> ImportRequest {
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

    fn upload(content: &str) -> StatementUpload<Cursor<Vec<u8>>> {
        StatementUpload::new(Cursor::new(content.as_bytes().to_vec())).with_file_name("extrato.csv")
    }

    fn service() -> (Arc<MemoryRepository>, ImportService) {
        let store = Arc::new(MemoryRepository::new());
        let service = ImportService::new(store.clone());
        (store, service)
    }

    #[test]
    fn test_single_row_import() {
        let (store, service) = service();
        let result = service.import(upload(SCENARIO_CSV), &pt_br_request()).unwrap();

        assert_eq!(result.format, StatementFormat::Delimited);
        assert_eq!((result.total, result.processed, result.created), (1, 1, 1));
        assert!(result.issues.is_empty());

        let tx = &result.transactions[0];
        assert_eq!(tx.description, "Groceries");
        assert_eq!(tx.amount, Decimal::new(4590, 2));
        assert_eq!(tx.transaction_type, TransactionType::Expense);
        assert_eq!(tx.category_id, 5);
        assert_eq!(tx.import_batch_id.as_deref(), Some(result.batch_id.as_str()));
        assert_eq!(store.transactions().len(), 1);

        let history = service.history(Some(1), 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].created, 1);
        assert_eq!(history[0].file_name.as_deref(), Some("extrato.csv"));
        assert_eq!(history[0].checksum.len(), 64);
    }

    #[test]
    fn test_zero_amount_uses_default_type() {
        let (store, service) = service();
        let mut request = pt_br_request();
        request.default_type = Some(TransactionType::Expense);

        let csv = "date;description;amount\n02/01/2024;Tarifa estornada;0,00\n";
        let result = service.import(upload(csv), &request).unwrap();

        assert!(result.issues.is_empty());
        assert_eq!(result.created, 1);
        assert_eq!(result.transactions[0].transaction_type, TransactionType::Expense);
        assert_eq!(result.transactions[0].amount, Decimal::ZERO);
        assert_eq!(store.transactions().len(), 1);
    }

    #[test]
    fn test_dry_run_does_not_persist() {
        let (store, service) = service();
        let mut request = pt_br_request();
        request.dry_run = true;

        let result = service.import(upload(SCENARIO_CSV), &request).unwrap();
        assert!(result.dry_run);
        assert_eq!((result.processed, result.created), (1, 0));
        assert!(result.transactions.is_empty());
        assert_eq!(store.create_calls(), 0);
        assert!(service.history(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_duplicates_within_batch() {
        let input = "date;description;amount\n\
                     01/01/2024;Groceries;-45,90\n\
                     01/01/2024;Groceries;-45,90\n";

        for dry_run in [false, true] {
            let (_, service) = service();
            let mut request = pt_br_request();
            request.dry_run = dry_run;

            let result = service.import(upload(input), &request).unwrap();
            assert_eq!(result.processed, 1);
            assert_eq!(result.duplicates, 1);
            assert_eq!(result.created, if dry_run { 0 } else { 1 });
            assert_eq!(result.issues.len(), 1);
            assert_eq!(result.issues[0].line, 2);
            assert_eq!(result.issues[0].kind, IssueKind::DuplicateSkipped);
        }
    }

    #[test]
    fn test_allow_policy_keeps_duplicates() {
        let input = "date;description;amount\n\
                     01/01/2024;Groceries;-45,90\n\
                     01/01/2024;Groceries;-45,90\n";
        let (store, service) = service();
        let mut request = pt_br_request();
        request.duplicate_policy = DuplicatePolicy::Allow;

        let result = service.import(upload(input), &request).unwrap();
        assert_eq!((result.created, result.duplicates), (2, 0));
        assert_eq!(store.transactions().len(), 2);
    }

    #[test]
    fn test_ignored_description() {
        let input = "date;description;amount\n\
                     01/01/2024;SALDO ANTERIOR;100,00\n\
                     02/01/2024;Padaria;-8,00\n";
        let (_, service) = service();
        let mut request = pt_br_request();
        request.ignore_descriptions = vec!["saldo anterior".to_string()];

        let result = service.import(upload(input), &request).unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.processed, 1);
        assert_eq!(result.duplicates, 0);
        assert_eq!(result.issues[0].kind, IssueKind::ConfigurationRejection);
        assert_eq!(result.issues[0].line, 1);
    }

    #[test]
    fn test_store_rejection_becomes_issue() {
        let store = Arc::new(MemoryRepository::new().with_rejection(|draft| {
            (draft.description == "Closed account")
                .then(|| "Counter-account is archived".to_string())
        }));
        let service = ImportService::new(store.clone());
        let input = "date;description;amount\n\
                     01/01/2024;Closed account;-1,00\n\
                     01/01/2024;Groceries;-45,90\n";

        let result = service.import(upload(input), &pt_br_request()).unwrap();
        assert_eq!((result.total, result.processed, result.created), (2, 1, 1));
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].kind, IssueKind::ParsingError);
        assert_eq!(result.issues[0].message, "Counter-account is archived");
    }

    #[test]
    fn test_unrecognized_type_is_parse_issue() {
        let input = "date;description;amount;type\n01/01/2024;Groceries;-45,90;TRANSFER\n";
        let (_, service) = service();

        let result = service.import(upload(input), &pt_br_request()).unwrap();
        assert_eq!((result.total, result.processed), (1, 0));
        assert_eq!(result.issues[0].kind, IssueKind::ParsingError);
    }

    #[test]
    fn test_whole_batch_failures() {
        let (store, service) = service();

        let unknown = StatementUpload::new(Cursor::new(Vec::new())).with_file_name("statement.pdf");
        assert!(matches!(
            service.import(unknown, &pt_br_request()),
            Err(Error::Config(_))
        ));

        let mut bad_tz = pt_br_request();
        bad_tz.time_zone = "Nowhere/Special".to_string();
        assert!(matches!(
            service.import(upload(SCENARIO_CSV), &bad_tz),
            Err(Error::Config(_))
        ));

        let ofx = StatementUpload::new(Cursor::new(b"OFXHEADER:100\n\nnot a statement".to_vec()))
            .with_file_name("a.ofx");
        assert!(matches!(
            service.import(ofx, &pt_br_request()),
            Err(Error::Parse(_))
        ));
        assert_eq!(store.create_calls(), 0);
    }

    #[test]
    fn test_ofx_entries_carry_source() {
        let statement = "OFXHEADER:100\n\n<OFX><BANKMSGSRSV1><STMTTRNRS><STMTRS><BANKTRANLIST>\
            <STMTTRN><TRNTYPE>DEBIT<DTPOSTED>20240105<TRNAMT>-12.50<FITID>f1<NAME>Coffee</STMTTRN>\
            </BANKTRANLIST></STMTRS></STMTTRNRS></BANKMSGSRSV1></OFX>";
        let (_, service) = service();
        let upload = StatementUpload::new(Cursor::new(statement.as_bytes().to_vec()))
            .with_content_type("application/x-ofx");

        let result = service.import(upload, &pt_br_request()).unwrap();
        assert_eq!(result.format, StatementFormat::ExchangeFormat);
        let tx = &result.transactions[0];
        assert_eq!(tx.source, Some(TransactionSource::BankTransfer));
        assert_eq!(tx.external_ref.as_deref(), Some("f1"));
        assert_eq!(tx.amount, Decimal::new(1250, 2));
    }
}
