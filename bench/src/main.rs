use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use indexbench::config::{BenchConfig, LogFormat};
use indexbench::{run_benchmark, update_baseline, PgClient, ResultsReporter, SuiteMode};

/// Cache-aware benchmark of two index access methods
#[derive(Parser, Debug)]
#[command(name = "indexbench", version)]
struct Args {
    /// Reduced workload subset at the tier's smallest row count (default)
    #[arg(long, conflicts_with = "full")]
    quick: bool,

    /// Core workloads at every row count of the detected tier
    #[arg(long)]
    full: bool,

    /// Replace the baseline with the candidate results of a saved run, then exit
    #[arg(long, value_name = "RESULTS_JSON", conflicts_with_all = ["quick", "full"])]
    update_baseline: Option<PathBuf>,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Database host
    #[arg(long, env = "PGHOST")]
    host: Option<String>,

    /// Database port
    #[arg(long, env = "PGPORT")]
    port: Option<u16>,

    /// Database user
    #[arg(long, env = "PGUSER")]
    user: Option<String>,

    /// Database name
    #[arg(long, env = "PGDATABASE")]
    dbname: Option<String>,

    /// Password (prefer the PGPASSWORD env var)
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Override the tier's wall-clock budget (seconds)
    #[arg(long, value_name = "SECS")]
    budget_secs: Option<u64>,

    /// Regenerate tables even when they already hold data, and drop them afterwards
    #[arg(long)]
    no_reuse: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = BenchConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.database.host = host;
    }
    if let Some(port) = args.port {
        config.database.port = port;
    }
    if let Some(user) = args.user {
        config.database.user = user;
    }
    if let Some(dbname) = args.dbname {
        config.database.dbname = dbname;
    }
    if args.password.is_some() {
        config.database.password = args.password;
    }
    if args.budget_secs.is_some() {
        config.run.budget_override_secs = args.budget_secs;
    }
    if args.no_reuse {
        config.run.reuse_data = false;
    }
    config.validate()?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing(&config);

    if let Some(results_file) = args.update_baseline {
        let entries = update_baseline(&results_file, &config.paths.baseline)?;
        println!(
            "Baseline {} updated with {} entries from {}",
            config.paths.baseline.display(),
            entries,
            results_file.display()
        );
        return Ok(());
    }

    let mode = if args.full {
        SuiteMode::Full
    } else {
        SuiteMode::Quick
    };

    info!(
        host = %config.database.host,
        port = config.database.port,
        dbname = %config.database.dbname,
        "connecting to database under test"
    );
    let client = PgClient::connect(config.client_config()).await?;

    let show_progress = !args.no_progress && std::io::stderr().is_terminal();
    let artifact = run_benchmark(&client, &config, mode, show_progress).await?;

    ResultsReporter::print_summary(&artifact);
    let paths = ResultsReporter::save_all(&artifact, &config.paths.results_dir)?;
    for path in &paths {
        println!("Saved {}", path.display());
    }

    if mode == SuiteMode::Full && !artifact.summary.has_regressions() {
        if let Some(json) = paths.first() {
            println!(
                "No regressions. To accept this run as the new baseline:\n  indexbench --update-baseline {}",
                json.display()
            );
        }
    }
    Ok(())
}

fn init_tracing(config: &BenchConfig) {
    let level = config.logging.level.as_str();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("indexbench={}", level).into());

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .json()
                        .with_target(true),
                )
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .init();
        }
    }
}
