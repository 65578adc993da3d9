use anyhow::Result;
use time::macros::format_description;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

use crate::schema::Provider;

/// Logs go to stderr so stdout carries only the run report.
pub fn setup_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let timer = LocalTime::new(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(timer)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Parses a comma-separated provider allow-list into canonical order.
///
/// Missing or blank input selects every provider.
pub fn parse_provider_selection(value: Option<&str>) -> Result<Vec<Provider>> {
    let requested: Vec<String> = value
        .unwrap_or("")
        .split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect();

    if requested.is_empty() {
        return Ok(Provider::ALL.to_vec());
    }

    let invalid: Vec<&str> = requested
        .iter()
        .filter(|name| name.parse::<Provider>().is_err())
        .map(String::as_str)
        .collect();
    if !invalid.is_empty() {
        anyhow::bail!("Unknown provider(s): {}", invalid.join(", "));
    }

    Ok(Provider::ALL
        .into_iter()
        .filter(|provider| requested.iter().any(|name| name == provider.as_str()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selection_means_all() {
        assert_eq!(parse_provider_selection(None).unwrap(), Provider::ALL.to_vec());
        assert_eq!(parse_provider_selection(Some(" , ")).unwrap(), Provider::ALL.to_vec());
    }

    #[test]
    fn selection_uses_canonical_order() {
        let selected = parse_provider_selection(Some("AdSense, ga4,ga4")).unwrap();
        assert_eq!(selected, vec![Provider::Ga4, Provider::Adsense]);
    }

    #[test]
    fn unknown_providers_are_listed() {
        let err = parse_provider_selection(Some("ga4,matomo,plausible")).unwrap_err();
        assert_eq!(err.to_string(), "Unknown provider(s): matomo, plausible");
    }
}
