use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

use super::{api_limit, cmp_desc, field_str, http_client, record, send_json, to_float};
use crate::config::CollectorConfig;
use crate::redact::sanitize_path;
use crate::sanitize::sanitize_rows;
use crate::schema::{DateWindow, Provider, ProviderResult, RawRecord};

const GRAPHQL_URL: &str = "https://api.cloudflare.com/client/v4/graphql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Zone,
    Account,
}

impl Scope {
    fn collection(&self) -> &'static str {
        match self {
            Scope::Zone => "zones",
            Scope::Account => "accounts",
        }
    }

    fn tag_variable(&self) -> &'static str {
        match self {
            Scope::Zone => "zoneTag",
            Scope::Account => "accountTag",
        }
    }

    fn note(&self) -> &'static str {
        match self {
            Scope::Zone => "mode=zone",
            Scope::Account => "mode=account",
        }
    }
}

/// GraphQL document for either scope; both share the same three groupings.
pub fn build_query(scope: Scope) -> String {
    let collection = scope.collection();
    let tag = scope.tag_variable();
    format!(
        r#"query Metrics(${tag}: String!, $start: Time!, $end: Time!, $limit: Int!) {{
  viewer {{
    {collection}(filter: {{ {tag}: ${tag} }}) {{
      totals: httpRequestsAdaptiveGroups(
        limit: 1
        filter: {{ datetime_geq: $start, datetime_lt: $end }}
      ) {{
        sum {{
          requests
          bytes
        }}
      }}
      topPaths: httpRequestsAdaptiveGroups(
        limit: $limit
        filter: {{ datetime_geq: $start, datetime_lt: $end }}
        orderBy: [sum_requests_DESC]
      ) {{
        dimensions {{
          clientRequestPath
        }}
        sum {{
          requests
          bytes
        }}
      }}
      statusGroups: httpRequestsAdaptiveGroups(
        limit: 200
        filter: {{ datetime_geq: $start, datetime_lt: $end }}
      ) {{
        dimensions {{
          edgeResponseStatus
        }}
        sum {{
          requests
        }}
      }}
    }}
  }}
}}"#
    )
}

/// Half-open UTC bounds covering every day of the window.
pub fn window_bounds(window: &DateWindow) -> (String, String) {
    let stamp = |date: NaiveDate| format!("{}T00:00:00Z", date.format("%Y-%m-%d"));
    (stamp(window.start()), stamp(window.end() + Duration::days(1)))
}

/// `404` -> `"4xx"`; out-of-range codes clamp into `0xx..9xx`.
pub fn status_group(status_code: i64) -> String {
    format!("{}xx", (status_code / 100).clamp(0, 9))
}

pub fn collect(
    config: &CollectorConfig,
    window: &DateWindow,
    row_limit: usize,
) -> Result<ProviderResult> {
    let (Some(token), Some(account_id)) = (
        config.cloudflare_api_token.as_deref(),
        config.cloudflare_account_id.as_deref(),
    ) else {
        return Ok(ProviderResult::not_configured(
            Provider::Cloudflare,
            *window,
            "Cloudflare provider is dormant until CLOUDFLARE_API_TOKEN and CLOUDFLARE_ACCOUNT_ID are set.",
        ));
    };

    let start_time = Instant::now();
    let (scope, tag) = match config.cloudflare_zone_id.as_deref() {
        Some(zone_id) => (Scope::Zone, zone_id),
        None => (Scope::Account, account_id),
    };
    let (start, end) = window_bounds(window);

    let mut variables = json!({"start": start, "end": end, "limit": api_limit(row_limit)});
    variables[scope.tag_variable()] = json!(tag);

    let payload = send_json(
        http_client()?
            .post(GRAPHQL_URL)
            .bearer_auth(token)
            .json(&json!({"query": build_query(scope), "variables": variables})),
        "Cloudflare GraphQL",
    )?;

    let result = into_result(parse_payload(&payload, scope)?, *window, scope, row_limit);

    info!(
        action = "complete",
        component = "cloudflare",
        mode = scope.note(),
        rows = result.rows.len(),
        duration_ms = start_time.elapsed().as_millis(),
        "Cloudflare collection finished"
    );
    Ok(result)
}

pub struct ParsedTraffic {
    pub metrics: BTreeMap<String, f64>,
    pub rows: Vec<RawRecord>,
}

/// Turns a GraphQL payload into metrics and rows: top paths first, then one
/// row per status bucket.
pub fn parse_payload(payload: &Value, scope: Scope) -> Result<ParsedTraffic> {
    if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages: Vec<String> = errors
                .iter()
                .map(|err| {
                    err.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string()
                })
                .collect();
            anyhow::bail!("Cloudflare GraphQL error: {}", messages.join("; "));
        }
    }

    let entity = payload
        .pointer(&format!("/data/viewer/{}/0", scope.collection()))
        .context("Cloudflare GraphQL returned no matching zone/account rows")?;

    let totals_sum = entity.pointer("/totals/0/sum");
    let requests_total = to_float(totals_sum.and_then(|s| s.get("requests")));
    let bytes_total = to_float(totals_sum.and_then(|s| s.get("bytes")));

    let mut buckets: BTreeMap<String, f64> = BTreeMap::new();
    for group in entity.get("statusGroups").and_then(Value::as_array).into_iter().flatten() {
        let code = to_float(group.pointer("/dimensions/edgeResponseStatus")) as i64;
        let requests = to_float(group.pointer("/sum/requests"));
        *buckets.entry(status_group(code)).or_insert(0.0) += requests;
    }

    let mut path_rows: Vec<RawRecord> = entity
        .get("topPaths")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|group| {
            let path = group
                .pointer("/dimensions/clientRequestPath")
                .and_then(Value::as_str)
                .filter(|p| !p.is_empty())
                .unwrap_or("/");
            record([
                ("kind", json!("path")),
                ("path", json!(sanitize_path(path))),
                ("requests", json!(to_float(group.pointer("/sum/requests")))),
                ("bytes", json!(to_float(group.pointer("/sum/bytes")))),
            ])
        })
        .collect();
    path_rows.sort_by(|a, b| {
        cmp_desc(a, b, "requests")
            .then_with(|| cmp_desc(a, b, "bytes"))
            .then_with(|| field_str(a, "path").cmp(field_str(b, "path")))
    });

    let status_rows = buckets.iter().map(|(bucket, requests)| {
        record([
            ("kind", json!("status_group")),
            ("status_group", json!(bucket)),
            ("requests", json!(requests)),
        ])
    });

    let metrics = BTreeMap::from([
        ("requests".to_string(), requests_total),
        ("bandwidthBytes".to_string(), bytes_total),
        ("errors4xx".to_string(), buckets.get("4xx").copied().unwrap_or(0.0)),
        ("errors5xx".to_string(), buckets.get("5xx").copied().unwrap_or(0.0)),
    ]);

    path_rows.extend(status_rows);
    Ok(ParsedTraffic { metrics, rows: path_rows })
}

fn into_result(
    parsed: ParsedTraffic,
    window: DateWindow,
    scope: Scope,
    row_limit: usize,
) -> ProviderResult {
    ProviderResult::new(Provider::Cloudflare, window)
        .with_metrics(parsed.metrics)
        .with_rows(sanitize_rows(&parsed.rows, row_limit))
        .with_notes(["source=cloudflare_graphql", scope.note()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValue;

    fn payload() -> Value {
        json!({
            "data": {"viewer": {"zones": [{
                "totals": [{"sum": {"requests": 1000, "bytes": 52000}}],
                "topPaths": [
                    {"dimensions": {"clientRequestPath": "/b"}, "sum": {"requests": 10, "bytes": 5}},
                    {"dimensions": {"clientRequestPath": "/a//x?y=1"}, "sum": {"requests": 10, "bytes": 9}},
                    {"dimensions": {"clientRequestPath": ""}, "sum": {"requests": 400, "bytes": 1}}
                ],
                "statusGroups": [
                    {"dimensions": {"edgeResponseStatus": 200}, "sum": {"requests": 900}},
                    {"dimensions": {"edgeResponseStatus": 404}, "sum": {"requests": 60}},
                    {"dimensions": {"edgeResponseStatus": 403}, "sum": {"requests": 20}},
                    {"dimensions": {"edgeResponseStatus": 502}, "sum": {"requests": 20}}
                ]
            }]}}
        })
    }

    #[test]
    fn metrics_bucket_status_codes() {
        let parsed = parse_payload(&payload(), Scope::Zone).unwrap();
        assert_eq!(parsed.metrics["requests"], 1000.0);
        assert_eq!(parsed.metrics["bandwidthBytes"], 52000.0);
        assert_eq!(parsed.metrics["errors4xx"], 80.0);
        assert_eq!(parsed.metrics["errors5xx"], 20.0);
    }

    #[test]
    fn rows_list_paths_then_status_groups() {
        let parsed = parse_payload(&payload(), Scope::Zone).unwrap();
        let labels: Vec<String> = parsed
            .rows
            .iter()
            .map(|r| match field_str(r, "kind") {
                "path" => field_str(r, "path").to_string(),
                _ => field_str(r, "status_group").to_string(),
            })
            .collect();
        assert_eq!(labels, vec!["/", "/a/x", "/b", "2xx", "4xx", "5xx"]);
    }

    fn week() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 7).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn result_rows_respect_limit() {
        let parsed = parse_payload(&payload(), Scope::Zone).unwrap();
        let result = into_result(parsed, week(), Scope::Zone, 2);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].get("path"), Some(&FieldValue::Text("/".to_string())));
        assert_eq!(result.notes, vec!["source=cloudflare_graphql", "mode=zone"]);
    }

    #[test]
    fn graphql_errors_fail_collection() {
        let err = parse_payload(
            &json!({"errors": [{"message": "bad token"}, {}]}),
            Scope::Account,
        )
        .err()
        .unwrap();
        assert_eq!(err.to_string(), "Cloudflare GraphQL error: bad token; unknown error");
    }

    #[test]
    fn missing_entity_fails_collection() {
        let empty = json!({"data": {"viewer": {"accounts": []}}});
        assert!(parse_payload(&empty, Scope::Account).is_err());
        // A zone payload read in account mode has no matching entity either.
        assert!(parse_payload(&payload(), Scope::Account).is_err());
    }

    #[test]
    fn status_groups_clamp() {
        assert_eq!(status_group(404), "4xx");
        assert_eq!(status_group(99), "0xx");
        assert_eq!(status_group(1200), "9xx");
        assert_eq!(status_group(-5), "0xx");
    }

    #[test]
    fn bounds_are_half_open_days() {
        assert_eq!(
            window_bounds(&week()),
            ("2026-02-01T00:00:00Z".to_string(), "2026-02-08T00:00:00Z".to_string())
        );
    }

    #[test]
    fn query_targets_requested_scope() {
        let zone = build_query(Scope::Zone);
        assert!(zone.contains("zones(filter: { zoneTag: $zoneTag })"));
        assert!(zone.starts_with("query Metrics($zoneTag: String!"));
        assert!(build_query(Scope::Account)
            .contains("accounts(filter: { accountTag: $accountTag })"));
    }
}
