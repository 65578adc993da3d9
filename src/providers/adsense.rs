use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

use super::google::{access_token, SCOPE_ADSENSE};
use super::{api_limit, field_str, http_client, record, send_json, to_float};
use crate::config::CollectorConfig;
use crate::sanitize::sanitize_rows;
use crate::schema::{DateWindow, Provider, ProviderResult, RawRecord};

const API_BASE: &str = "https://adsense.googleapis.com/v2";

/// Report header name -> metric key, in the order the totals are requested.
const METRICS: [(&str, &str, &str); 3] = [
    ("ESTIMATED_EARNINGS", "estimated_earnings", "estimatedEarnings"),
    ("IMPRESSIONS", "impressions", "impressions"),
    ("PAGE_VIEWS_RPM", "page_views_rpm", "pageViewsRpm"),
];

pub fn collect(
    config: &CollectorConfig,
    window: &DateWindow,
    row_limit: usize,
) -> Result<ProviderResult> {
    if !config.adsense_configured() {
        return Ok(ProviderResult::not_configured(
            Provider::Adsense,
            *window,
            "AdSense provider is dormant until Google OAuth config is set.",
        ));
    }

    let start_time = Instant::now();
    let token = access_token(config, &[SCOPE_ADSENSE])?;
    let client = http_client()?;

    let (account, discovered) = match config.adsense_account.as_deref() {
        Some(account) => (account.to_string(), false),
        None => (discover_account(&client, &token)?, true),
    };

    let mut query: Vec<(&str, String)> = vec![
        ("dateRange", "CUSTOM".to_string()),
        ("startDate.year", window.start().format("%Y").to_string()),
        ("startDate.month", window.start().format("%-m").to_string()),
        ("startDate.day", window.start().format("%-d").to_string()),
        ("endDate.year", window.end().format("%Y").to_string()),
        ("endDate.month", window.end().format("%-m").to_string()),
        ("endDate.day", window.end().format("%-d").to_string()),
        ("dimensions", "DATE".to_string()),
        ("orderBy", "+DATE".to_string()),
        ("limit", api_limit(row_limit).to_string()),
    ];
    query.extend(METRICS.iter().map(|(api, _, _)| ("metrics", api.to_string())));

    let report = send_json(
        client
            .get(format!("{API_BASE}/{account}/reports:generate"))
            .bearer_auth(&token)
            .query(&query),
        "AdSense report",
    )?;

    let metrics = parse_totals(&report);
    let rows = parse_daily_rows(&report);

    let mut notes = vec![format!("account={account}")];
    if discovered {
        notes.push("account_discovered=true".to_string());
    }

    info!(
        action = "complete",
        component = "adsense",
        rows = rows.len(),
        account_discovered = discovered,
        duration_ms = start_time.elapsed().as_millis(),
        "AdSense collection finished"
    );

    Ok(ProviderResult::new(Provider::Adsense, *window)
        .with_metrics(metrics)
        .with_rows(sanitize_rows(&rows, row_limit))
        .with_notes(notes))
}

fn discover_account(client: &Client, token: &str) -> Result<String> {
    let response = send_json(
        client
            .get(format!("{API_BASE}/accounts"))
            .bearer_auth(token)
            .query(&[("pageSize", "10")]),
        "AdSense account listing",
    )?;
    first_account(&response)
}

pub fn first_account(response: &Value) -> Result<String> {
    response
        .pointer("/accounts/0/name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("AdSense account discovery failed: no accounts found")
}

/// Totals arrive as a cell list in the order the metrics were requested.
pub fn parse_totals(report: &Value) -> BTreeMap<String, f64> {
    // The first total cell belongs to the DATE dimension when present.
    let cells: Vec<&Value> = report
        .pointer("/totals/cells")
        .or_else(|| report.get("totals"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|cell| cell.is_object())
        .collect();
    let offset = cells.len().saturating_sub(METRICS.len());

    METRICS
        .iter()
        .enumerate()
        .map(|(i, (_, _, key))| {
            let value = cells.get(offset + i).and_then(|cell| cell.get("value"));
            (key.to_string(), to_float(value))
        })
        .collect()
}

/// One `daily` row per report row, keyed by the lowercased report headers.
pub fn parse_daily_rows(report: &Value) -> Vec<RawRecord> {
    let headers: Vec<String> = report
        .get("headers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|h| h.get("name").and_then(Value::as_str).unwrap_or("").to_lowercase())
        .collect();

    let mut rows: Vec<RawRecord> = report
        .get("rows")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|row| {
            let cells = row.get("cells").and_then(Value::as_array);
            let mut data = record([("kind", json!("daily"))]);
            for (i, name) in headers.iter().enumerate() {
                let value = cells.and_then(|c| c.get(i)).and_then(|cell| cell.get("value"));
                if name == "date" {
                    let date = value.and_then(Value::as_str).unwrap_or("");
                    data.insert("date".to_string(), json!(date));
                } else if let Some((_, _, key)) =
                    METRICS.iter().find(|(_, header, _)| header == name)
                {
                    data.insert(key.to_string(), json!(to_float(value)));
                }
            }
            data
        })
        .collect();

    rows.sort_by(|a, b| field_str(a, "date").cmp(field_str(b, "date")));
    rows
}
