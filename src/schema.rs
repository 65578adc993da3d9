use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CollectorError, Result};

/// One field of a provider row as it arrives from a collector.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ga4,
    Gsc,
    Cloudflare,
    Adsense,
}

impl Provider {
    /// Canonical order, used whenever providers are listed.
    pub const ALL: [Provider; 4] = [
        Provider::Ga4,
        Provider::Gsc,
        Provider::Cloudflare,
        Provider::Adsense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ga4 => "ga4",
            Provider::Gsc => "gsc",
            Provider::Cloudflare => "cloudflare",
            Provider::Adsense => "adsense",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        Provider::ALL
            .into_iter()
            .find(|provider| provider.as_str() == s)
            .ok_or_else(|| CollectorError::UnknownProvider(s.to_string()))
    }
}

/// Inclusive date window. `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedDateWindow")]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UncheckedDateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<UncheckedDateWindow> for DateWindow {
    type Error = CollectorError;

    fn try_from(value: UncheckedDateWindow) -> Result<Self> {
        DateWindow::new(value.start, value.end)
    }
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(CollectorError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered, counting both ends.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A scalar value that survived sanitization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl From<FieldValue> for serde_json::Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Bool(b) => serde_json::Value::Bool(b),
            FieldValue::Number(n) => serde_json::Value::Number(n),
            FieldValue::Text(s) => serde_json::Value::String(s),
        }
    }
}

/// A flat, PII-scrubbed row with keys in sorted order.
///
/// Only [`crate::sanitize::sanitize_row`] builds non-empty records, so every
/// instance has already been through redaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SanitizedRecord(BTreeMap<String, FieldValue>);

impl SanitizedRecord {
    pub(crate) fn from_fields(fields: BTreeMap<String, FieldValue>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Stable serialization used to detect exact duplicates.
    pub fn fingerprint(&self) -> String {
        // BTreeMap keys serialize in order, and scalars cannot fail to encode.
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn to_raw(&self) -> RawRecord {
        self.0
            .iter()
            .map(|(key, value)| (key.clone(), serde_json::Value::from(value.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderResult {
    pub provider: Provider,
    pub date_range: DateWindow,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub rows: Vec<SanitizedRecord>,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ProviderResult {
    /// Starts an empty result for `provider`, stamped with the current time.
    pub fn new(provider: Provider, date_range: DateWindow) -> Self {
        Self {
            provider,
            date_range,
            generated_at: Utc::now(),
            metrics: BTreeMap::new(),
            rows: Vec::new(),
            notes: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Builds a result from loosely typed parts.
    ///
    /// Fails on a provider name outside the known set or a window whose start
    /// falls after its end.
    pub fn assemble(provider: &str, start: NaiveDate, end: NaiveDate) -> Result<Self> {
        let provider = provider.parse::<Provider>()?;
        let window = DateWindow::new(start, end)?;
        Ok(Self::new(provider, window))
    }

    /// Shape used for a provider whose collector has nothing to run against.
    pub fn not_configured(provider: Provider, date_range: DateWindow, note: &str) -> Self {
        Self::new(provider, date_range)
            .with_notes([note])
            .with_errors(["not configured"])
    }

    /// Shape used when a collector failed and the run continues anyway.
    pub fn degraded(provider: Provider, date_range: DateWindow, message: &str) -> Self {
        Self::new(provider, date_range)
            .with_notes(["provider execution failed"])
            .with_errors([message])
    }

    pub fn with_metrics<K, I>(mut self, metrics: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, f64)>,
    {
        self.metrics = metrics.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }

    pub fn with_rows(mut self, rows: Vec<SanitizedRecord>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_notes<S, I>(mut self, notes: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        self.notes = notes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_errors<S, I>(mut self, errors: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        self.errors = errors.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn slice(&self) -> ProviderSlice {
        ProviderSlice {
            provider: self.provider,
            metrics: self.metrics.clone(),
            row_count: self.rows.len(),
            errors: self.errors.clone(),
            notes: self.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSlice {
    pub provider: Provider,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummaryResult {
    pub generated_at: DateTime<Utc>,
    pub date_range: DateWindow,
    #[serde(default)]
    pub providers: Vec<ProviderSlice>,
    #[serde(default)]
    pub kpis: BTreeMap<String, f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
