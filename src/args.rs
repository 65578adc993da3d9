use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "metricsd",
    about = "Collect aggregated, privacy-safe site and ad metrics into dated JSON files",
    version,
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect provider metrics and write versioned JSON files
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// End date (YYYY-MM-DD). Defaults to today in the collector timezone
    #[arg(long = "date", value_parser = parse_date)]
    pub date: Option<NaiveDate>,

    /// Inclusive lookback window in days
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(i64).range(1..))]
    pub days: i64,

    /// Output root directory
    #[arg(long, default_value = "data/metrics")]
    pub out: PathBuf,

    /// Comma-separated providers (ga4,gsc,cloudflare,adsense)
    #[arg(long)]
    pub providers: Option<String>,

    /// Run collection without writing files
    #[arg(long)]
    pub dry_run: bool,

    /// Pretty-print output JSON files
    #[arg(long)]
    pub json_pretty: bool,

    /// Continue when provider errors occur
    #[arg(long)]
    pub fail_soft: bool,

    /// Optional .env path for collector config
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| "--date must be in YYYY-MM-DD format".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let args = Args::try_parse_from(argv).unwrap();
        match args.command {
            Command::Run(run) => run,
        }
    }

    #[test]
    fn run_defaults() {
        let run = run_args(&["metricsd", "run"]);
        assert_eq!(run.date, None);
        assert_eq!(run.days, 7);
        assert_eq!(run.out, PathBuf::from("data/metrics"));
        assert!(!run.dry_run && !run.json_pretty && !run.fail_soft);
    }

    #[test]
    fn run_flags() {
        let run = run_args(&[
            "metricsd", "run", "--date", "2026-02-07", "--days", "30", "--providers", "gsc,ga4",
            "--dry-run", "--json-pretty", "--fail-soft", "--env-file", "ops.env",
        ]);
        assert_eq!(run.date, NaiveDate::from_ymd_opt(2026, 2, 7));
        assert_eq!(run.days, 30);
        assert_eq!(run.providers.as_deref(), Some("gsc,ga4"));
        assert!(run.dry_run && run.json_pretty && run.fail_soft);
        assert_eq!(run.env_file, Some(PathBuf::from("ops.env")));
    }

    #[test]
    fn rejects_bad_date_and_days() {
        assert!(Args::try_parse_from(["metricsd", "run", "--date", "07/02/2026"]).is_err());
        assert!(Args::try_parse_from(["metricsd", "run", "--days", "0"]).is_err());
    }

    #[test]
    fn verbose_is_global() {
        let args = Args::try_parse_from(["metricsd", "run", "-v"]).unwrap();
        assert!(args.verbose);
    }
}
