//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific stage of statement ingestion or its bookkeeping.

pub mod duplicate;
pub mod import;
pub mod logging;
pub mod migration;
pub mod normalize;

pub use duplicate::{day_window, DuplicateDetector, DuplicateKey};
pub use import::ImportService;
pub use logging::{EntryPoint, LogEntry, LogEvent, LogLevel, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use normalize::{normalize_entry, normalize_key, MappingIndex};
