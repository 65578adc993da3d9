use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

use crate::schema::{ProviderResult, SummaryResult};

pub const SUMMARY_FILE: &str = "summary.json";

/// Encodes `payload` as UTF-8 JSON with sorted keys and one trailing newline.
pub fn to_json_bytes<T: Serialize>(payload: &T, pretty: bool) -> Result<Vec<u8>> {
    // Going through `Value` sorts struct fields along with map keys.
    let value = serde_json::to_value(payload).context("Failed to encode payload as JSON")?;
    let mut text = if pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    text.push('\n');
    Ok(text.into_bytes())
}

/// Directory that holds one run's files.
pub fn output_dir(out_root: &Path, target_date: NaiveDate) -> PathBuf {
    out_root.join(target_date.format("%Y-%m-%d").to_string())
}

/// Writes `<provider>.json` for every result and `summary.json` under
/// `<out_root>/<YYYY-MM-DD>/`, returning that directory.
pub fn write_results(
    out_root: &Path,
    target_date: NaiveDate,
    results: &[ProviderResult],
    summary: &SummaryResult,
    pretty: bool,
) -> Result<PathBuf> {
    let start_time = Instant::now();
    let dir = output_dir(out_root, target_date);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory {:?}", dir))?;

    for result in results {
        let path = dir.join(format!("{}.json", result.provider));
        write_json(&path, result, pretty)?;
        info!(action = "write", component = "storage", provider = %result.provider, path = ?path, rows = result.rows.len(), "Wrote provider result");
    }

    let summary_path = dir.join(SUMMARY_FILE);
    write_json(&summary_path, summary, pretty)?;

    info!(
        action = "complete",
        component = "storage",
        files = results.len() + 1,
        duration_ms = start_time.elapsed().as_millis(),
        "Wrote run output"
    );
    Ok(dir)
}

fn write_json<T: Serialize>(path: &Path, payload: &T, pretty: bool) -> Result<()> {
    let bytes = to_json_bytes(payload, pretty)?;
    fs::write(path, bytes).with_context(|| format!("Failed to write {:?}", path))
}
