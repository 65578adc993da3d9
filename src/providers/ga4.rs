use anyhow::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

use super::google::{access_token, SCOPE_GA4};
use super::{api_limit, cmp_desc, field_str, http_client, record, send_json, to_float};
use crate::config::CollectorConfig;
use crate::redact::sanitize_path;
use crate::sanitize::sanitize_rows;
use crate::schema::{DateWindow, Provider, ProviderResult, RawRecord};

const API_BASE: &str = "https://analyticsdata.googleapis.com/v1beta";
const TOTAL_METRICS: [&str; 3] = ["sessions", "activeUsers", "screenPageViews"];

pub fn collect(
    config: &CollectorConfig,
    window: &DateWindow,
    row_limit: usize,
) -> Result<ProviderResult> {
    let Some(property_id) = config
        .ga4_property_id
        .as_deref()
        .filter(|_| config.ga4_configured())
    else {
        return Ok(ProviderResult::not_configured(
            Provider::Ga4,
            *window,
            "GA4 provider is dormant until GA4_PROPERTY_ID and Google OAuth config are set.",
        ));
    };

    let start_time = Instant::now();
    let token = access_token(config, &[SCOPE_GA4])?;
    let client = http_client()?;
    let url = format!("{API_BASE}/properties/{property_id}:runReport");
    let date_ranges = json!([{
        "startDate": window.start().to_string(),
        "endDate": window.end().to_string()
    }]);

    let totals = send_json(
        client.post(&url).bearer_auth(&token).json(&json!({
            "dateRanges": date_ranges.clone(),
            "metrics": TOTAL_METRICS.iter().map(|name| json!({"name": name})).collect::<Vec<_>>(),
            "metricAggregations": ["TOTAL"]
        })),
        "GA4 totals report",
    )?;

    let pages = send_json(
        client.post(&url).bearer_auth(&token).json(&json!({
            "dateRanges": date_ranges,
            "dimensions": [{"name": "pagePath"}],
            "metrics": [{"name": "sessions"}, {"name": "screenPageViews"}],
            "orderBys": [
                {"metric": {"metricName": "screenPageViews"}, "desc": true},
                {"dimension": {"dimensionName": "pagePath"}}
            ],
            "limit": api_limit(row_limit)
        })),
        "GA4 top pages report",
    )?;

    let metrics = parse_totals(&totals);
    let page_rows = parse_top_pages(&pages);
    let top_pages = page_rows.len().min(row_limit);

    info!(
        action = "complete",
        component = "ga4",
        rows = page_rows.len(),
        duration_ms = start_time.elapsed().as_millis(),
        "GA4 collection finished"
    );

    Ok(ProviderResult::new(Provider::Ga4, *window)
        .with_metrics(metrics)
        .with_rows(sanitize_rows(&page_rows, row_limit))
        .with_notes([format!("top_pages={top_pages}")]))
}

fn metric_value(values: Option<&Value>, index: usize) -> f64 {
    to_float(
        values
            .and_then(|v| v.get(index))
            .and_then(|v| v.get("value")),
    )
}

/// Reads report totals, falling back to the single dimensionless row.
pub fn parse_totals(report: &Value) -> BTreeMap<String, f64> {
    let total_row = report
        .get("totals")
        .and_then(|t| t.get(0))
        .or_else(|| report.get("rows").and_then(|r| r.get(0)));
    let values = total_row.and_then(|row| row.get("metricValues"));

    TOTAL_METRICS
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), metric_value(values, i)))
        .collect()
}

/// Page rows ordered by pageviews, then sessions (both descending), then path.
pub fn parse_top_pages(report: &Value) -> Vec<RawRecord> {
    let mut rows: Vec<RawRecord> = report
        .get("rows")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    let path = row
                        .get("dimensionValues")
                        .and_then(|d| d.get(0))
                        .and_then(|d| d.get("value"))
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    let values = row.get("metricValues");
                    record([
                        ("page", Value::from(sanitize_path(path))),
                        ("sessions", Value::from(metric_value(values, 0))),
                        ("pageviews", Value::from(metric_value(values, 1))),
                    ])
                })
                .collect()
        })
        .unwrap_or_default();

    rows.sort_by(|a, b| {
        cmp_desc(a, b, "pageviews")
            .then_with(|| cmp_desc(a, b, "sessions"))
            .then_with(|| field_str(a, "page").cmp(field_str(b, "page")))
    });
    rows
}
