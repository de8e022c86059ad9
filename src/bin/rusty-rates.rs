//! rusty-rates CLI - run the exchange-rate pipeline or any single stage
//!
//! ## Example Usage
//!
//! ```bash
//! # Full run: fetch, transform, aggregate, movers, narrative
//! rusty-rates run
//!
//! # Re-aggregate a day (e.g. after a late snapshot)
//! rusty-rates aggregate --date 2024-01-15
//!
//! # Inspect the current top movers
//! rusty-rates movers --window 20 --json
//!
//! # Check a gold file
//! rusty-rates validate data/gold/2024-01-15.parquet
//! ```

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rusty_rates::config::PipelineConfig;
use rusty_rates::context::RunContext;
use rusty_rates::ingest::RateSource;
use rusty_rates::metrics::{MetricsEngine, MetricsRecord};
use rusty_rates::pipeline::{aggregator_from_config, Pipeline};
use rusty_rates::storage::DataLayout;
use rusty_rates::transform::Transformer;
use rusty_rates::validate::validate_gold_file;
use std::path::{Path, PathBuf};
use std::process;

/// rusty-rates: exchange-rate pipeline (raw → silver → gold)
#[derive(Parser)]
#[command(name = "rusty-rates")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Exchange-rate ingestion, aggregation and top-mover analytics", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (default: ~/.rusty-rates/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage once
    Run,

    /// Fetch one snapshot into the raw layer
    Ingest {
        /// Base currency (default: from config)
        #[arg(short = 'b', long)]
        base: Option<String>,
    },

    /// Transform raw snapshots into silver batches
    Transform {
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,
    },

    /// Build the gold dataset from silver batches
    Aggregate {
        /// Date to aggregate (YYYY-MM-DD, default: today UTC)
        #[arg(short = 'd', long)]
        date: Option<NaiveDate>,

        /// Rebuild gold/cumulative.parquet from every batch instead
        #[arg(long, conflicts_with = "date")]
        cumulative: bool,
    },

    /// Rank top movers over the gold history
    Movers {
        /// Volatility window (default: from config)
        #[arg(short = 'w', long)]
        window: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Check a gold parquet file against the schema
    Validate {
        #[arg(value_name = "GOLD_FILE")]
        gold_file: PathBuf,
    },

    /// Show configuration and storage state
    Info,
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rusty-rates")
        .join("config.toml")
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = match PipelineConfig::load(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    };

    if cli.verbose {
        println!(
            "{} v{}",
            "rusty-rates".cyan().bold(),
            env!("CARGO_PKG_VERSION")
        );
        println!(
            "Data dir: {}",
            config.storage.data_dir.display().to_string().dimmed()
        );
    }

    let result = match cli.command {
        Commands::Run => run_pipeline(&config).await,
        Commands::Ingest { base } => ingest(&config, base).await,
        Commands::Transform { files } => transform(&config, &files),
        Commands::Aggregate { date, cumulative } => aggregate(&config, date, cumulative),
        Commands::Movers { window, json } => movers(&config, window, json),
        Commands::Validate { gold_file } => validate(&gold_file),
        Commands::Info => show_info(&config, &config_path),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn layout(config: &PipelineConfig) -> DataLayout {
    DataLayout::new(&config.storage.data_dir)
}

async fn run_pipeline(config: &PipelineConfig) -> anyhow::Result<()> {
    let mut pipeline = Pipeline::from_config(config).context("invalid configuration")?;
    let ctx = RunContext::new("pipeline");

    println!("{} {}", "Running pipeline".cyan().bold(), ctx.run_id);
    let summary = pipeline.run(&ctx).await?;

    println!();
    println!("{}", "Run Summary".green().bold());
    println!("{}", "===========".green());
    println!("  {} {}", "Snapshot:".bold(), summary.snapshot.path.display());
    println!(
        "  {} {} accepted, {} rejected",
        "Silver:".bold(),
        summary.transform.accepted,
        summary.transform.reject_count
    );
    match &summary.gold_path {
        Some(path) => println!("  {} {}", "Gold:".bold(), path.display()),
        None => println!("  {} {}", "Gold:".bold(), "no data".yellow()),
    }
    println!("  {} {}", "Insights:".bold(), summary.insights_path.display());
    println!("  {} {:.2}s", "Elapsed:".bold(), summary.elapsed.as_secs_f64());
    println!();
    print_movers(&summary.top_movers);

    println!();
    match summary.narrative.text() {
        Some(text) => println!("{}\n{}", "Narrative".cyan().bold(), text),
        None => println!("{}", "Narrative unavailable (degraded)".yellow()),
    }
    Ok(())
}

async fn ingest(config: &PipelineConfig, base: Option<String>) -> anyhow::Result<()> {
    config.validate()?;
    let layout = layout(config);
    layout.ensure_dirs()?;

    let base = base.unwrap_or_else(|| config.source.base_currency.clone());
    let source = RateSource::from_config(config, &layout)?;
    let handle = source.fetch(&RunContext::new("ingest"), &base).await?;

    println!(
        "{} {} rates for {} → {}",
        "✓".green().bold(),
        handle.rate_count,
        handle.base_currency,
        handle.path.display()
    );
    Ok(())
}

fn transform(config: &PipelineConfig, files: &[PathBuf]) -> anyhow::Result<()> {
    let transformer = Transformer::new(layout(config), &config.source.base_currency);
    let report = transformer.transform_many(&RunContext::new("transform"), files)?;

    for outcome in &report.outcomes {
        println!(
            "{} {} ({}): {} accepted, {} rejected",
            "✓".green().bold(),
            outcome.batch,
            outcome.date,
            outcome.accepted,
            outcome.reject_count
        );
    }
    for (path, e) in &report.failures {
        println!("{} {}: {}", "✗".red().bold(), path.display(), e);
    }

    if !report.failures.is_empty() {
        bail!("{} of {} snapshots could not be transformed", report.failures.len(), files.len());
    }
    Ok(())
}

fn aggregate(config: &PipelineConfig, date: Option<NaiveDate>, cumulative: bool) -> anyhow::Result<()> {
    let mut aggregator = aggregator_from_config(config, &layout(config))?;
    let ctx = RunContext::new("load");

    let written = if cumulative {
        aggregator.aggregate_cumulative(&ctx)?
    } else {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        aggregator.aggregate(&ctx, date)?
    };

    match written {
        Some(path) => println!("{} {}", "✓".green().bold(), path.display()),
        None => println!("{}", "No silver data to aggregate".yellow()),
    }
    Ok(())
}

fn movers(config: &PipelineConfig, window: Option<usize>, json: bool) -> anyhow::Result<()> {
    let aggregator = aggregator_from_config(config, &layout(config))?;
    let history: Vec<_> = aggregator
        .load_history()?
        .into_iter()
        .map(|g| g.record)
        .collect();

    let engine = MetricsEngine::new(window.unwrap_or(config.metrics.window), config.metrics.top_n);
    let movers = engine.compute_top_movers(&history);

    if json {
        println!("{}", serde_json::to_string_pretty(&movers)?);
    } else {
        print_movers(&movers);
    }
    Ok(())
}

fn print_movers(movers: &[MetricsRecord]) {
    if movers.is_empty() {
        println!("{}", "No gold history yet".dimmed());
        return;
    }

    println!("{}", "Top Movers".cyan().bold());
    println!("{}", "==========".cyan());
    println!("  {:<6} {:>14} {:>10} {:>10}", "Code", "Rate", "Change %", "Vol %");
    for m in movers {
        let change = format!("{:>+10.2}", m.pct_change);
        let change = if m.pct_change >= 0.0 {
            change.green()
        } else {
            change.red()
        };
        println!(
            "  {:<6} {:>14.6} {} {:>10.2}",
            m.target_currency.bold(),
            m.current_price,
            change,
            m.volatility
        );
    }
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let report = validate_gold_file(path)
        .with_context(|| format!("could not read {}", path.display()))?;

    if report.is_valid() {
        println!("{} {}", "✓".green().bold(), report);
        return Ok(());
    }

    println!("{} {}", "✗".red().bold(), path.display());
    for problem in report.problems() {
        println!("  - {}", problem);
    }
    bail!("gold file failed validation")
}

fn show_info(config: &PipelineConfig, config_path: &Path) -> anyhow::Result<()> {
    let layout = layout(config);

    println!("{}", "rusty-rates".cyan().bold());
    println!("{}", "===========".cyan());
    println!("  {} {}", "Version:".bold(), env!("CARGO_PKG_VERSION"));
    println!(
        "  {} {}{}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() { "" } else { " (not found, defaults)" }
    );
    println!("  {} {}", "Pipeline version:".bold(), config.pipeline_version);
    println!("  {} {}", "Base currency:".bold(), config.source.base_currency);
    println!(
        "  {} {}",
        "API key:".bold(),
        if config.source.api_key.is_empty() {
            "not set".yellow()
        } else {
            "set".green()
        }
    );
    println!("  {} {:?}", "Enrichment:".bold(), config.enrichment.mode);
    match &config.mirror.db_path {
        Some(db) => println!("  {} {}", "Mirror:".bold(), db.display()),
        None => println!("  {} {}", "Mirror:".bold(), "disabled".dimmed()),
    }
    println!();

    println!("{}", "Storage".cyan().bold());
    println!("  {} {}", "Data dir:".bold(), layout.root().display());
    println!("  {} {}", "Raw snapshots:".bold(), count(layout.raw_snapshots()));
    println!("  {} {}", "Silver batches:".bold(), count(layout.all_silver_batches()));
    println!("  {} {}", "Gold days:".bold(), count(layout.daily_gold_files()));
    Ok(())
}

fn count(listing: rusty_rates::error::Result<Vec<PathBuf>>) -> String {
    match listing {
        Ok(paths) => paths.len().to_string(),
        Err(e) => format!("unavailable ({})", e),
    }
}
