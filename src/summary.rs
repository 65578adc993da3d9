use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use crate::error::{CollectorError, Result};
use crate::schema::{DateWindow, Provider, ProviderResult, SummaryResult};

/// A fixed KPI: output key, source provider, and the metric names to try in order.
struct KpiSource {
    key: &'static str,
    provider: Provider,
    metrics: &'static [&'static str],
}

// The `_7d` suffix is a historical name and holds for any window length.
const KPI_SOURCES: &[KpiSource] = &[
    kpi("sessions_7d", Provider::Ga4, &["sessions"]),
    kpi("active_users_7d", Provider::Ga4, &["activeUsers"]),
    kpi("pageviews_7d", Provider::Ga4, &["screenPageViews", "pageViews"]),
    kpi("clicks_7d", Provider::Gsc, &["clicks"]),
    kpi("impressions_7d", Provider::Gsc, &["impressions"]),
    kpi("cf_requests_7d", Provider::Cloudflare, &["requests"]),
    kpi("cf_bandwidth_bytes_7d", Provider::Cloudflare, &["bandwidthBytes"]),
    kpi("cf_4xx_7d", Provider::Cloudflare, &["errors4xx"]),
    kpi("cf_5xx_7d", Provider::Cloudflare, &["errors5xx"]),
    kpi("earnings_7d", Provider::Adsense, &["estimatedEarnings"]),
    kpi("ads_impressions_7d", Provider::Adsense, &["impressions"]),
    kpi("ads_rpm_avg_7d", Provider::Adsense, &["pageViewsRpm"]),
];

const fn kpi(
    key: &'static str,
    provider: Provider,
    metrics: &'static [&'static str],
) -> KpiSource {
    KpiSource { key, provider, metrics }
}

pub fn kpi_keys() -> impl Iterator<Item = &'static str> {
    KPI_SOURCES.iter().map(|source| source.key)
}

/// Folds one run's provider results into the cross-provider summary.
///
/// Results are reported in input order. If a provider appears more than once,
/// its last result feeds the KPIs.
pub fn build_summary(results: &[ProviderResult]) -> Result<SummaryResult> {
    let first = results.first().ok_or(CollectorError::EmptySummaryInput)?;

    let start = results
        .iter()
        .map(|r| r.date_range.start())
        .min()
        .unwrap_or(first.date_range.start());
    let end = results
        .iter()
        .map(|r| r.date_range.end())
        .max()
        .unwrap_or(first.date_range.end());
    let date_range = DateWindow::new(start, end)?;

    let warnings: Vec<String> = results
        .iter()
        .filter(|r| r.is_degraded())
        .map(|r| format!("{}: {}", r.provider, r.errors.join(", ")))
        .collect();

    let by_provider: HashMap<Provider, &BTreeMap<String, f64>> =
        results.iter().map(|r| (r.provider, &r.metrics)).collect();

    let kpis: BTreeMap<String, f64> = KPI_SOURCES
        .iter()
        .map(|source| {
            let value = by_provider
                .get(&source.provider)
                .and_then(|metrics| source.metrics.iter().find_map(|name| metrics.get(*name)))
                .copied()
                .unwrap_or(0.0);
            (source.key.to_string(), value)
        })
        .collect();

    info!(
        action = "complete",
        component = "summary",
        providers = results.len(),
        warnings = warnings.len(),
        date_range = %date_range,
        "Built run summary"
    );

    Ok(SummaryResult {
        generated_at: Utc::now(),
        date_range,
        providers: results.iter().map(ProviderResult::slice).collect(),
        kpis,
        warnings,
    })
}
