pub mod args;
pub mod collect;
pub mod config;
pub mod error;
pub mod providers;
pub mod redact;
pub mod sanitize;
pub mod schema;
pub mod storage;
pub mod summary;
pub mod utils;

pub use args::Args;
pub use collect::{collect_all, collect_with, CollectionOutcome};
pub use config::{load_config, resolve_date_window, CollectorConfig};
pub use error::CollectorError;
pub use sanitize::{sanitize_row, sanitize_rows};
pub use schema::{
    DateWindow, FieldValue, Provider, ProviderResult, ProviderSlice, RawRecord, SanitizedRecord,
    SummaryResult,
};
pub use storage::write_results;
pub use summary::build_summary;
