use anyhow::Result;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::CollectorConfig;
use crate::providers::collector_for;
use crate::sanitize::{sanitize_rows, DEFAULT_ROW_LIMIT};
use crate::schema::{DateWindow, Provider, ProviderResult, SummaryResult};
use crate::summary::build_summary;

/// What a run produced. `fatal_errors` is non-empty only when collection
/// stopped early, in which case there is no summary.
#[derive(Debug)]
pub struct CollectionOutcome {
    pub results: Vec<ProviderResult>,
    pub fatal_errors: Vec<String>,
    pub summary: Option<SummaryResult>,
}

impl CollectionOutcome {
    pub fn aborted(&self) -> bool {
        !self.fatal_errors.is_empty()
    }
}

/// Runs each provider in turn through `run_provider`.
///
/// Successful results have their rows re-passed through the sanitizer. A
/// failure either becomes a degraded result (`fail_soft`) or stops the run.
pub fn collect_with<F>(
    providers: &[Provider],
    window: &DateWindow,
    fail_soft: bool,
    mut run_provider: F,
) -> Result<CollectionOutcome>
where
    F: FnMut(Provider) -> Result<ProviderResult>,
{
    let start_time = Instant::now();
    let mut results = Vec::with_capacity(providers.len());
    let mut fatal_errors = Vec::new();

    for &provider in providers {
        println!("- {provider}: start");
        match run_provider(provider) {
            Ok(mut result) => {
                let raw: Vec<_> = result.rows.iter().map(|row| row.to_raw()).collect();
                result.rows = sanitize_rows(&raw, DEFAULT_ROW_LIMIT);
                if result.is_degraded() {
                    println!("  {provider}: warnings/errors -> {}", result.errors.join(", "));
                } else {
                    println!("  {provider}: ok ({} rows)", result.rows.len());
                }
                results.push(result);
            }
            Err(e) => {
                let message = error_message(&e);
                if fail_soft {
                    warn!(action = "collect", component = "orchestrator", provider = %provider, error = %message, "Provider failed, continuing");
                    println!("  {provider}: failed (fail-soft) -> {message}");
                    results.push(ProviderResult::degraded(provider, *window, &message));
                    continue;
                }
                warn!(action = "collect", component = "orchestrator", provider = %provider, error = %message, "Provider failed, aborting run");
                fatal_errors.push(format!("{provider}: {message}"));
                break;
            }
        }
    }

    let summary = if fatal_errors.is_empty() && !results.is_empty() {
        Some(build_summary(&results)?)
    } else {
        None
    };

    info!(
        action = "complete",
        component = "orchestrator",
        providers = results.len(),
        aborted = !fatal_errors.is_empty(),
        duration_ms = start_time.elapsed().as_millis(),
        "Collection finished"
    );

    Ok(CollectionOutcome { results, fatal_errors, summary })
}

/// Runs the real collectors for `providers`.
pub fn collect_all(
    config: &CollectorConfig,
    window: &DateWindow,
    providers: &[Provider],
    fail_soft: bool,
) -> Result<CollectionOutcome> {
    collect_with(providers, window, fail_soft, |provider| {
        collector_for(provider)(config, window, DEFAULT_ROW_LIMIT)
    })
}

fn error_message(error: &anyhow::Error) -> String {
    let message = format!("{error:#}");
    if message.is_empty() {
        "provider execution failed".to_string()
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldValue;
    use chrono::NaiveDate;

    fn week() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 7).unwrap(),
        )
        .unwrap()
    }

    fn ok_result(provider: Provider) -> Result<ProviderResult> {
        Ok(ProviderResult::new(provider, week()).with_metrics([("sessions", 3.0), ("clicks", 4.0)]))
    }

    #[test]
    fn fail_soft_records_degraded_result_and_continues() {
        let providers = [Provider::Ga4, Provider::Gsc, Provider::Cloudflare];
        let outcome = collect_with(&providers, &week(), true, |provider| match provider {
            Provider::Gsc => Err(anyhow::anyhow!("quota exceeded")),
            other => ok_result(other),
        })
        .unwrap();

        assert!(!outcome.aborted());
        assert_eq!(outcome.results.len(), 3);
        let gsc = &outcome.results[1];
        assert_eq!(gsc.errors, vec!["quota exceeded".to_string()]);
        assert_eq!(gsc.notes, vec!["provider execution failed".to_string()]);

        let summary = outcome.summary.unwrap();
        assert_eq!(summary.warnings, vec!["gsc: quota exceeded".to_string()]);
        assert_eq!(summary.kpis["sessions_7d"], 3.0);
        assert_eq!(summary.kpis["clicks_7d"], 0.0);
    }

    #[test]
    fn strict_mode_aborts_on_first_failure() {
        let providers = [Provider::Ga4, Provider::Gsc, Provider::Cloudflare];
        let mut calls = Vec::new();
        let outcome = collect_with(&providers, &week(), false, |provider| {
            calls.push(provider);
            match provider {
                Provider::Gsc => Err(anyhow::anyhow!("boom")),
                other => ok_result(other),
            }
        })
        .unwrap();

        assert!(outcome.aborted());
        assert_eq!(outcome.fatal_errors, vec!["gsc: boom".to_string()]);
        assert!(outcome.summary.is_none());
        assert_eq!(calls, vec![Provider::Ga4, Provider::Gsc]);
    }

    #[test]
    fn rows_are_resanitized_and_limited() {
        let rows: Vec<_> = (0..80)
            .map(|i| {
                let mut fields = std::collections::BTreeMap::new();
                fields.insert("page".to_string(), FieldValue::Text(format!("/p/{i}")));
                crate::schema::SanitizedRecord::from_fields(fields)
            })
            .collect();
        let outcome = collect_with(&[Provider::Ga4], &week(), false, |provider| {
            Ok(ProviderResult::new(provider, week()).with_rows(rows.clone()))
        })
        .unwrap();
        assert_eq!(outcome.results[0].rows.len(), DEFAULT_ROW_LIMIT);
    }

    #[test]
    fn unconfigured_providers_are_not_failures() {
        let outcome =
            collect_all(&CollectorConfig::default(), &week(), &Provider::ALL, false).unwrap();
        assert!(!outcome.aborted());
        let summary = outcome.summary.unwrap();
        assert_eq!(summary.warnings.len(), 4);
        assert!(summary.kpis.values().all(|v| *v == 0.0));
    }
}
