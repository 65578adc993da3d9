use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollectorError>;

/// Construction and precondition failures. None of these are retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectorError {
    #[error("unknown provider '{0}' (expected one of: ga4, gsc, cloudflare, adsense)")]
    UnknownProvider(String),

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("provider results cannot be empty")]
    EmptySummaryInput,

    #[error("days must be >= 1 and fit the calendar (got {0})")]
    InvalidDays(i64),
}
