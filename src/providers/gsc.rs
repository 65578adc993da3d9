use anyhow::Result;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;
use url::form_urlencoded;

use super::google::{access_token, SCOPE_GSC};
use super::{api_limit, cmp_desc, field_str, http_client, record, send_json, to_float};
use crate::config::CollectorConfig;
use crate::redact::{sanitize_path, sanitize_query, DEFAULT_TEXT_LIMIT};
use crate::sanitize::sanitize_rows;
use crate::schema::{DateWindow, Provider, ProviderResult, RawRecord};

const API_BASE: &str = "https://www.googleapis.com/webmasters/v3/sites";

/// Segment dimensions, in the order their rows are concatenated.
const SEGMENTS: [&str; 4] = ["query", "page", "country", "device"];

struct SearchConsole<'a> {
    client: Client,
    token: String,
    endpoint: String,
    window: &'a DateWindow,
}

impl SearchConsole<'_> {
    fn query(&self, mut body: Value) -> Result<Value> {
        body["startDate"] = json!(self.window.start().to_string());
        body["endDate"] = json!(self.window.end().to_string());
        send_json(
            self.client.post(&self.endpoint).bearer_auth(&self.token).json(&body),
            "Search Console query",
        )
    }
}

pub fn collect(
    config: &CollectorConfig,
    window: &DateWindow,
    row_limit: usize,
) -> Result<ProviderResult> {
    let Some(site_url) = config
        .gsc_site_url
        .as_deref()
        .filter(|_| config.gsc_configured())
    else {
        return Ok(ProviderResult::not_configured(
            Provider::Gsc,
            *window,
            "GSC provider is dormant until GSC_SITE_URL and Google OAuth config are set.",
        ));
    };

    let start_time = Instant::now();
    let site: String = form_urlencoded::byte_serialize(site_url.as_bytes()).collect();
    let console = SearchConsole {
        client: http_client()?,
        token: access_token(config, &[SCOPE_GSC])?,
        endpoint: format!("{API_BASE}/{site}/searchAnalytics/query"),
        window,
    };

    let totals = console.query(json!({"rowLimit": 1}))?;
    let metrics = parse_totals(&totals);

    let mut rows = Vec::new();
    for dimension in SEGMENTS {
        let response = console.query(json!({
            "dimensions": [dimension],
            "rowLimit": api_limit(row_limit)
        }))?;
        rows.extend(parse_segment(&response, dimension));
    }

    info!(
        action = "complete",
        component = "gsc",
        rows = rows.len(),
        duration_ms = start_time.elapsed().as_millis(),
        "Search Console collection finished"
    );

    Ok(ProviderResult::new(Provider::Gsc, *window)
        .with_metrics(metrics)
        .with_rows(sanitize_rows(&rows, row_limit))
        .with_notes(["rows include top query/page/country/device segments"]))
}

pub fn parse_totals(response: &Value) -> BTreeMap<String, f64> {
    let total_row = response.get("rows").and_then(|rows| rows.get(0));
    ["clicks", "impressions", "ctr", "position"]
        .into_iter()
        .map(|name| (name.to_string(), to_float(total_row.and_then(|row| row.get(name)))))
        .collect()
}

/// Rows for one segment dimension, ordered by clicks then impressions
/// (descending), then value and kind.
pub fn parse_segment(response: &Value, kind: &str) -> Vec<RawRecord> {
    let mut rows: Vec<RawRecord> = response
        .get("rows")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|row| {
            let raw = row
                .get("keys")
                .and_then(|keys| keys.get(0))
                .map(|key| match key {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            let value = match kind {
                "page" => sanitize_path(&raw),
                "query" => sanitize_query(&raw, DEFAULT_TEXT_LIMIT),
                _ => raw,
            };
            record([
                ("kind", json!(kind)),
                ("value", json!(value)),
                ("clicks", json!(to_float(row.get("clicks")))),
                ("impressions", json!(to_float(row.get("impressions")))),
                ("ctr", json!(to_float(row.get("ctr")))),
                ("position", json!(to_float(row.get("position")))),
            ])
        })
        .collect();

    rows.sort_by(|a, b| {
        cmp_desc(a, b, "clicks")
            .then_with(|| cmp_desc(a, b, "impressions"))
            .then_with(|| field_str(a, "value").cmp(field_str(b, "value")))
            .then_with(|| field_str(a, "kind").cmp(field_str(b, "kind")))
    });
    rows
}
