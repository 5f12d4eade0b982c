use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use qbt_config::{deep_merge, load_file, BacktestConfig};

#[derive(Parser)]
#[command(name = "qbt", about = "Deterministic event-driven backtesting engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest.
    Run(RunArgs),
    /// Sweep a grid of (short_window, long_window) pairs.
    Sweep(SweepArgs),
}

#[derive(clap::Args, Clone)]
struct ConfigOverrides {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    symbols: Option<String>,
    #[arg(long)]
    csv_path: Option<String>,
    #[arg(long)]
    run_name: Option<String>,
    #[arg(long)]
    out_dir: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    short_window: Option<usize>,
    #[arg(long)]
    long_window: Option<usize>,
    #[arg(long)]
    initial_cash: Option<f64>,
    #[arg(long)]
    trade_quantity: Option<i64>,
    #[arg(long)]
    commission_per_trade: Option<f64>,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[arg(long)]
    json_logs: bool,
}

#[derive(clap::Args)]
struct RunArgs {
    #[command(flatten)]
    overrides: ConfigOverrides,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    no_persist: bool,
}

#[derive(clap::Args)]
struct SweepArgs {
    #[command(flatten)]
    overrides: ConfigOverrides,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    no_persist: bool,
    #[arg(long)]
    short_grid: Option<String>,
    #[arg(long)]
    long_grid: Option<String>,
    #[arg(long)]
    export_csv: Option<PathBuf>,
}

fn parse_grid(raw: &str) -> Result<Vec<usize>> {
    raw.split(',')
        .map(|s| s.trim().parse::<usize>().with_context(|| format!("invalid grid value: {s:?}")))
        .collect()
}

fn init_logging(log_level: &str, json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Merge the config file (if any) with CLI flag overrides, CLI winning.
fn build_merged_document(overrides: &ConfigOverrides) -> Result<Value> {
    let mut merged = match &overrides.config {
        Some(path) => load_file(path)?,
        None => Value::Object(Default::default()),
    };

    let mut cli_doc = serde_json::Map::new();
    if let Some(v) = &overrides.symbols {
        cli_doc.insert("symbols".into(), json!(v));
    }
    if let Some(v) = &overrides.csv_path {
        cli_doc.insert("csv_path".into(), json!(v));
    }
    if let Some(v) = &overrides.run_name {
        cli_doc.insert("run_name".into(), json!(v));
    }
    if let Some(v) = &overrides.out_dir {
        cli_doc.insert("out_dir".into(), json!(v));
    }
    if let Some(v) = &overrides.database_url {
        cli_doc.insert("database_url".into(), json!(v));
    }
    if let Some(v) = overrides.short_window {
        cli_doc.insert("short_window".into(), json!(v));
    }
    if let Some(v) = overrides.long_window {
        cli_doc.insert("long_window".into(), json!(v));
    }
    if let Some(v) = overrides.initial_cash {
        cli_doc.insert("initial_cash".into(), json!(v));
    }
    if let Some(v) = overrides.trade_quantity {
        cli_doc.insert("trade_quantity".into(), json!(v));
    }
    if let Some(v) = overrides.commission_per_trade {
        cli_doc.insert("commission_per_trade".into(), json!(v));
    }

    deep_merge(&mut merged, Value::Object(cli_doc));
    Ok(merged)
}

async fn maybe_persist(
    database_url: Option<&str>,
    no_persist: bool,
    summaries: &[qbt_backtest::RunSummary],
) -> Result<()> {
    if no_persist {
        return Ok(());
    }
    let Some(url) = database_url else {
        return Ok(());
    };
    let writer = qbt_db::RunWriter::connect(url).await.context("connect to persistence store")?;
    writer.ensure_schema().await.context("ensure runs table exists")?;
    let records: Vec<qbt_db::RunRecord> = summaries
        .iter()
        .map(|s| qbt_db::RunRecord {
            created_at: chrono::Utc::now(),
            run_name: s.run_name.clone(),
            symbols: json!(s.symbols),
            short_window: s.short_window as i64,
            long_window: s.long_window as i64,
            initial_cash: s.initial_cash,
            final_equity: s.final_equity,
            total_return: s.total_return,
            sharpe: s.sharpe,
            max_drawdown: s.max_drawdown,
            total_commission: s.total_commission,
            total_slippage_cost: s.total_slippage_cost,
            halted: s.halted,
            halt_reason: s.halt_reason.clone(),
            extra: s.extra.clone(),
        })
        .collect();
    if records.len() == 1 {
        writer.insert_one(&records[0]).await.context("insert run")?;
    } else {
        writer.insert_bulk(&records).await.context("insert runs")?;
    }
    Ok(())
}

async fn run_run(args: RunArgs) -> Result<()> {
    let merged = build_merged_document(&args.overrides)?;
    let config = BacktestConfig::from_value(&merged).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    if args.dry_run {
        println!("Config valid.");
        println!("{}", serde_json::to_string_pretty(&config.to_json())?);
        return Ok(());
    }

    init_logging(&args.overrides.log_level, args.overrides.json_logs);

    let ticks = qbt_ticks::read_sorted_ticks(std::path::Path::new(&config.csv_path))
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let summary = qbt_backtest::run_backtest(&config, &ticks);

    println!("{}", serde_json::to_string_pretty(&summary_to_json(&summary))?);

    maybe_persist(config.database_url.as_deref(), args.no_persist, std::slice::from_ref(&summary)).await?;
    Ok(())
}

async fn run_sweep(args: SweepArgs) -> Result<()> {
    let merged = build_merged_document(&args.overrides)?;
    let config = BacktestConfig::from_value(&merged).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let short_grid = match (&args.short_grid, &config.short_grid) {
        (Some(raw), _) => parse_grid(raw)?,
        (None, Some(grid)) => grid.clone(),
        (None, None) => anyhow::bail!("sweep requires --short-grid or config short_grid"),
    };
    let long_grid = match (&args.long_grid, &config.long_grid) {
        (Some(raw), _) => parse_grid(raw)?,
        (None, Some(grid)) => grid.clone(),
        (None, None) => anyhow::bail!("sweep requires --long-grid or config long_grid"),
    };

    if args.dry_run {
        println!("Config valid.");
        println!("{}", serde_json::to_string_pretty(&config.to_json())?);
        return Ok(());
    }

    init_logging(&args.overrides.log_level, args.overrides.json_logs);

    let ticks = qbt_ticks::read_sorted_ticks(std::path::Path::new(&config.csv_path))
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let outcome = qbt_backtest::run_sweep(&config, &short_grid, &long_grid, &ticks);

    if outcome.summaries.is_empty() {
        tracing::warn!("sweep produced zero valid pairs");
    }

    if let Some(path) = &args.export_csv {
        qbt_backtest::export_summaries_csv(path, &outcome.summaries)?;
    }

    maybe_persist(config.database_url.as_deref(), args.no_persist, &outcome.summaries).await?;

    println!("{} valid pairs, {} skipped", outcome.summaries.len(), outcome.skipped_pairs);
    Ok(())
}

fn summary_to_json(s: &qbt_backtest::RunSummary) -> Value {
    json!({
        "run_name": s.run_name,
        "symbols": s.symbols,
        "short_window": s.short_window,
        "long_window": s.long_window,
        "initial_cash": s.initial_cash,
        "final_equity": s.final_equity,
        "total_return": s.total_return,
        "sharpe": s.sharpe,
        "max_drawdown": s.max_drawdown,
        "total_commission": s.total_commission,
        "total_slippage_cost": s.total_slippage_cost,
        "halted": s.halted,
        "halt_reason": s.halt_reason,
        "extra": s.extra,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Commands::Run(args) => run_run(args).await,
        Commands::Sweep(args) => run_sweep(args).await,
    }
}
