//! Provider collectors.
//!
//! Each collector takes the resolved config, the run's date window and a row
//! limit hint, and returns one [`ProviderResult`]. An unconfigured provider is
//! not a failure: it comes back with `errors: ["not configured"]`.

pub mod adsense;
pub mod cloudflare;
pub mod ga4;
pub mod google;
pub mod gsc;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;
use std::cmp::Ordering;
use std::time::Duration;

use crate::config::CollectorConfig;
use crate::schema::{DateWindow, Provider, ProviderResult, RawRecord};

pub type Collector = fn(&CollectorConfig, &DateWindow, usize) -> Result<ProviderResult>;

const HTTP_TIMEOUT: Duration = Duration::from_secs(45);
const ERROR_BODY_LIMIT: usize = 200;

pub fn collector_for(provider: Provider) -> Collector {
    match provider {
        Provider::Ga4 => ga4::collect,
        Provider::Gsc => gsc::collect,
        Provider::Cloudflare => cloudflare::collect,
        Provider::Adsense => adsense::collect,
    }
}

/// Lenient numeric coercion: numbers pass through, numeric strings are
/// parsed, and anything else counts as zero.
pub(crate) fn to_float(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(Value::Bool(true)) => 1.0,
        _ => 0.0,
    }
}

pub(crate) fn record<const N: usize>(fields: [(&str, Value); N]) -> RawRecord {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Numeric field of a raw record, for sort keys.
fn field_f64(row: &RawRecord, key: &str) -> f64 {
    to_float(row.get(key))
}

/// Descending comparison on a numeric field.
pub(crate) fn cmp_desc(a: &RawRecord, b: &RawRecord, key: &str) -> Ordering {
    field_f64(b, key)
        .partial_cmp(&field_f64(a, key))
        .unwrap_or(Ordering::Equal)
}

pub(crate) fn field_str<'a>(row: &'a RawRecord, key: &str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or("")
}

/// `max(1, limit)` as sent to provider APIs.
pub(crate) fn api_limit(row_limit: usize) -> usize {
    row_limit.max(1)
}

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("metricsd/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Sends a request and decodes a JSON body, turning non-2xx into an error.
pub(crate) fn send_json(request: RequestBuilder, what: &str) -> Result<Value> {
    let response = request
        .send()
        .with_context(|| format!("{what} request failed"))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        anyhow::bail!("{what} returned HTTP {status}: {snippet}");
    }
    response
        .json::<Value>()
        .with_context(|| format!("{what} returned a non-JSON body"))
}
