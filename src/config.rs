use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::CollectorError;
use crate::schema::DateWindow;

pub const DEFAULT_TIMEZONE: &str = "Europe/Istanbul";
const DEFAULT_ENV_FILE: &str = ".env";
const DEFAULT_TOKEN_CACHE: &str = "~/.config/metricsd/tokens.json";

/// Fully resolved collector settings. Absent values mean "not configured".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    pub ga4_property_id: Option<String>,
    pub gsc_site_url: Option<String>,
    pub google_oauth_client_secret_file: Option<PathBuf>,
    pub google_token_cache: PathBuf,
    pub cloudflare_api_token: Option<String>,
    pub cloudflare_account_id: Option<String>,
    pub cloudflare_zone_id: Option<String>,
    pub adsense_account: Option<String>,
    pub collector_timezone: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            ga4_property_id: None,
            gsc_site_url: None,
            google_oauth_client_secret_file: None,
            google_token_cache: expand_home(DEFAULT_TOKEN_CACHE),
            cloudflare_api_token: None,
            cloudflare_account_id: None,
            cloudflare_zone_id: None,
            adsense_account: None,
            collector_timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

impl CollectorConfig {
    /// Builds the config from a variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| clean(lookup(key));

        Self {
            ga4_property_id: get("GA4_PROPERTY_ID"),
            gsc_site_url: get("GSC_SITE_URL"),
            google_oauth_client_secret_file: get("GOOGLE_OAUTH_CLIENT_SECRET_FILE")
                .map(|raw| expand_home(&raw)),
            google_token_cache: expand_home(
                &get("GOOGLE_TOKEN_CACHE").unwrap_or_else(|| DEFAULT_TOKEN_CACHE.to_string()),
            ),
            cloudflare_api_token: get("CLOUDFLARE_API_TOKEN"),
            cloudflare_account_id: get("CLOUDFLARE_ACCOUNT_ID"),
            cloudflare_zone_id: get("CLOUDFLARE_ZONE_ID"),
            adsense_account: get("ADSENSE_ACCOUNT"),
            collector_timezone: get("COLLECTOR_TIMEZONE")
                .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
        }
    }

    pub fn ga4_configured(&self) -> bool {
        self.ga4_property_id.is_some() && self.google_oauth_client_secret_file.is_some()
    }

    pub fn gsc_configured(&self) -> bool {
        self.gsc_site_url.is_some() && self.google_oauth_client_secret_file.is_some()
    }

    pub fn cloudflare_configured(&self) -> bool {
        self.cloudflare_api_token.is_some() && self.cloudflare_account_id.is_some()
    }

    pub fn adsense_configured(&self) -> bool {
        self.google_oauth_client_secret_file.is_some()
    }
}

/// Loads config from the process environment, overlaid by an env file.
///
/// Process variables win over file entries. Without `env_file`, `.env` in the
/// working directory is used when present.
pub fn load_config(env_file: Option<&Path>) -> Result<CollectorConfig> {
    let file_vars = match env_file {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Env file not found: {:?}", path);
            }
            read_env_file(path)?
        }
        None => {
            let default_file = Path::new(DEFAULT_ENV_FILE);
            if default_file.exists() {
                read_env_file(default_file)?
            } else {
                HashMap::new()
            }
        }
    };

    let config = CollectorConfig::from_lookup(|key| {
        env::var(key)
            .ok()
            .or_else(|| file_vars.get(key).cloned())
    });

    info!(
        action = "loaded",
        component = "config",
        ga4 = config.ga4_configured(),
        gsc = config.gsc_configured(),
        cloudflare = config.cloudflare_configured(),
        adsense = config.adsense_configured(),
        timezone = %config.collector_timezone,
        "Collector configuration resolved"
    );
    Ok(config)
}

/// Parses `KEY=VALUE` lines. Blank lines and `#` comments are skipped; an
/// optional `export ` prefix and matching outer quotes are removed.
pub fn parse_env(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((key, value)) = line.split_once('=') else {
            warn!(action = "parse", component = "env_file", line_number = line_num + 1, "Ignoring line without '='");
            continue;
        };

        vars.insert(key.trim().to_string(), unquote(value.trim()).to_string());
    }

    vars
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read env file {:?}", path))?;
    let vars = parse_env(&content);
    info!(action = "load", component = "env_file", file_path = ?path, var_count = vars.len(), "Loaded env file");
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}

/// Today's date in the named IANA zone, or in UTC if the name is unknown.
pub fn today_in(timezone_name: &str) -> NaiveDate {
    match timezone_name.parse::<Tz>() {
        Ok(tz) => Utc::now().with_timezone(&tz).date_naive(),
        Err(_) => {
            warn!(action = "resolve", component = "timezone", timezone = timezone_name, "Unknown timezone, using UTC");
            Utc::now().date_naive()
        }
    }
}

/// Inclusive window of `days` days ending at `end` (default: today).
pub fn resolve_date_window(
    end: Option<NaiveDate>,
    days: i64,
    timezone_name: &str,
) -> std::result::Result<DateWindow, CollectorError> {
    if days <= 0 {
        return Err(CollectorError::InvalidDays(days));
    }
    let end = end.unwrap_or_else(|| today_in(timezone_name));
    let start = Duration::try_days(days - 1)
        .and_then(|span| end.checked_sub_signed(span))
        .ok_or(CollectorError::InvalidDays(days))?;
    DateWindow::new(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn blank_values_are_unset() {
        let config = CollectorConfig::from_lookup(lookup_from(&[
            ("GA4_PROPERTY_ID", "   "),
            ("GOOGLE_OAUTH_CLIENT_SECRET_FILE", "/tmp/secret.json"),
            ("COLLECTOR_TIMEZONE", ""),
        ]));
        assert_eq!(config.ga4_property_id, None);
        assert!(!config.ga4_configured());
        assert!(config.adsense_configured());
        assert_eq!(config.collector_timezone, DEFAULT_TIMEZONE);
    }

    #[test]
    fn configured_predicates() {
        let config = CollectorConfig::from_lookup(lookup_from(&[
            ("GA4_PROPERTY_ID", "123"),
            ("GSC_SITE_URL", "sc-domain:example.com"),
            ("GOOGLE_OAUTH_CLIENT_SECRET_FILE", "/tmp/secret.json"),
            ("CLOUDFLARE_API_TOKEN", "cf"),
        ]));
        assert!(config.ga4_configured());
        assert!(config.gsc_configured());
        assert!(!config.cloudflare_configured());
        assert!(!CollectorConfig::default().cloudflare_configured());
    }

    #[test]
    fn parses_env_file_syntax() {
        let vars = parse_env(
            "# comment\n\nexport GA4_PROPERTY_ID=42\nGSC_SITE_URL = \"https://example.com/\"\nBROKEN\nADSENSE_ACCOUNT='accounts/pub-1'\n",
        );
        assert_eq!(vars["GA4_PROPERTY_ID"], "42");
        assert_eq!(vars["GSC_SITE_URL"], "https://example.com/");
        assert_eq!(vars["ADSENSE_ACCOUNT"], "accounts/pub-1");
        assert!(!vars.contains_key("BROKEN"));
    }

    #[test]
    fn load_config_reads_explicit_env_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "CLOUDFLARE_ZONE_ID=zone-from-file-7f3a").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        // A process variable would win, but this one is never set by the suite.
        assert_eq!(config.cloudflare_zone_id.as_deref(), Some("zone-from-file-7f3a"));
    }

    #[test]
    fn load_config_fails_on_missing_env_file() {
        assert!(load_config(Some(Path::new("/definitely/not/here.env"))).is_err());
    }

    #[test]
    fn window_is_inclusive() {
        let end = NaiveDate::from_ymd_opt(2026, 2, 7).unwrap();
        let window = resolve_date_window(Some(end), 7, "UTC").unwrap();
        assert_eq!(window.start(), NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(window.end(), end);

        let single = resolve_date_window(Some(end), 1, "UTC").unwrap();
        assert_eq!(single.start(), single.end());
    }

    #[test]
    fn window_rejects_non_positive_days() {
        assert_eq!(
            resolve_date_window(None, 0, "UTC").unwrap_err(),
            CollectorError::InvalidDays(0)
        );
    }

    #[test]
    fn window_rejects_days_past_the_calendar() {
        let end = NaiveDate::from_ymd_opt(2026, 2, 7).unwrap();
        for days in [10_000_000_000, i64::MAX] {
            assert_eq!(
                resolve_date_window(Some(end), days, "UTC").unwrap_err(),
                CollectorError::InvalidDays(days)
            );
        }
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let window = resolve_date_window(None, 3, "Mars/Olympus_Mons").unwrap();
        assert_eq!(window.days(), 3);
    }
}
