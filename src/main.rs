use anyhow::Result;
use clap::Parser;
use tracing::info;

use metricsd::args::{Args, Command, RunArgs};
use metricsd::storage::to_json_bytes;
use metricsd::utils::{parse_provider_selection, setup_logging};
use metricsd::{collect_all, load_config, resolve_date_window, write_results};

fn run(args: &RunArgs) -> Result<bool> {
    let config = load_config(args.env_file.as_deref())?;
    let window = resolve_date_window(args.date, args.days, &config.collector_timezone)?;
    let providers = parse_provider_selection(args.providers.as_deref())?;

    let names: Vec<&str> = providers.iter().map(|p| p.as_str()).collect();
    println!(
        "Collecting metrics for {} providers={} dry_run={}",
        window,
        names.join(","),
        args.dry_run
    );

    let outcome = collect_all(&config, &window, &providers, args.fail_soft)?;

    if outcome.aborted() {
        eprintln!("Collection aborted:");
        for err in &outcome.fatal_errors {
            eprintln!("  - {err}");
        }
        return Ok(false);
    }

    let Some(summary) = outcome.summary else {
        anyhow::bail!("No provider results to summarize");
    };

    if args.dry_run {
        println!("Dry-run summary:");
        print!("{}", String::from_utf8(to_json_bytes(&summary, true)?)?);
        return Ok(true);
    }

    let output_dir = write_results(
        &args.out,
        window.end(),
        &outcome.results,
        &summary,
        args.json_pretty,
    )?;
    info!(action = "complete", component = "run", output_dir = ?output_dir, "Run finished");
    println!("Wrote metrics to: {}", output_dir.display());
    Ok(true)
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let Command::Run(run_args) = &args.command;
    if !run(run_args)? {
        std::process::exit(1);
    }
    Ok(())
}
