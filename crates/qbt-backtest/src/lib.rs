//! The event loop (component F) and the parameter-sweep driver (component H).
//!
//! `run_backtest` composes the strategy, execution simulator and portfolio
//! into a single serial pass over a tick stream; `run_sweep` repeats it over
//! a Cartesian product of window pairs and ranks the results.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde_json::{json, Value};

use qbt_config::BacktestConfig;
use qbt_execution::ExecutionSimulator;
use qbt_metrics::{max_drawdown, returns_from_equity, sharpe_ratio, DEFAULT_TRADING_DAYS};
use qbt_portfolio::Portfolio;
use qbt_strategy::{MaCrossStrategy, Strategy};
use qbt_types::{Market, Order};

/// Errors raised by the driver layer. Config/tick/execution-time errors are
/// surfaced by the crates that own them; this crate only adds the export and
/// persistence failure kinds that are specific to driving a run or a sweep.
#[derive(Debug)]
pub enum BacktestError {
    CsvExport(String),
    PersistenceFailed(String),
}

impl fmt::Display for BacktestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestError::CsvExport(msg) => write!(f, "CSV export failed: {msg}"),
            BacktestError::PersistenceFailed(msg) => write!(f, "persistence failed: {msg}"),
        }
    }
}

impl std::error::Error for BacktestError {}

impl From<csv::Error> for BacktestError {
    fn from(e: csv::Error) -> Self {
        BacktestError::CsvExport(e.to_string())
    }
}

/// The result of a single backtest run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSummary {
    pub run_name: String,
    pub symbols: Vec<String>,
    pub short_window: usize,
    pub long_window: usize,
    pub initial_cash: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub total_commission: f64,
    pub total_slippage_cost: f64,
    pub halted: bool,
    pub halt_reason: Option<String>,
    /// Full execution and risk configs, for audit/reproducibility.
    pub extra: Value,
}

/// Drive a single backtest to completion over an already-sorted tick stream.
pub fn run_backtest(config: &BacktestConfig, ticks: &[Market]) -> RunSummary {
    tracing::info!(
        run_name = %config.run_name,
        symbols = ?config.symbols,
        "starting backtest run"
    );

    let mut portfolio = Portfolio::new(config.portfolio, config.risk);
    let mut execution = ExecutionSimulator::new(config.commission_per_trade, config.execution);
    let mut strategy = MaCrossStrategy::new(config.strategy.clone());
    let symbol_set: HashSet<&str> = config.symbols.iter().map(|s| s.as_str()).collect();

    for tick in ticks {
        if !symbol_set.contains(tick.symbol.as_str()) {
            continue;
        }

        portfolio.mark_to_market(&tick.symbol, tick.mid);
        let was_halted = portfolio.risk_state().trading_halted;

        for fill in execution.on_market(tick) {
            portfolio.on_fill(&fill);
        }

        if !was_halted && portfolio.risk_state().trading_halted {
            tracing::info!(
                run_name = %config.run_name,
                reason = ?portfolio.risk_state().halt_reason,
                "trading halted"
            );
        }

        if portfolio.risk_state().trading_halted {
            continue;
        }

        if let Some(side) = portfolio.check_stop_loss(&tick.symbol) {
            let qty = portfolio.get_position(&tick.symbol).quantity.abs();
            if qty > 0 {
                if let Ok(order) = Order::market(tick.timestamp, tick.symbol.clone(), side, qty) {
                    execution.submit(order);
                }
                continue;
            }
        }

        if let Some(signal) = strategy.on_market(tick) {
            if portfolio.can_place_order(&signal.symbol, signal.side, config.trade_quantity) {
                if let Ok(order) = Order::market(
                    tick.timestamp,
                    signal.symbol.clone(),
                    signal.side,
                    config.trade_quantity,
                ) {
                    execution.submit(order);
                }
            }
        }
    }

    let returns = returns_from_equity(portfolio.equity_curve());
    let sharpe = sharpe_ratio(&returns, DEFAULT_TRADING_DAYS);
    let dd = max_drawdown(portfolio.equity_curve());
    let final_equity = portfolio.equity();
    let total_return = final_equity / config.initial_cash - 1.0;

    tracing::info!(run_name = %config.run_name, final_equity, total_return, "backtest run complete");

    let cfg_json = config.to_json();
    let extra = json!({
        "execution": cfg_json.get("execution").cloned().unwrap_or(Value::Null),
        "risk": cfg_json.get("risk").cloned().unwrap_or(Value::Null),
    });

    RunSummary {
        run_name: config.run_name.clone(),
        symbols: config.symbols.clone(),
        short_window: config.short_window,
        long_window: config.long_window,
        initial_cash: config.initial_cash,
        final_equity,
        total_return,
        sharpe,
        max_drawdown: dd,
        total_commission: portfolio.total_commission(),
        total_slippage_cost: portfolio.total_slippage_cost(),
        halted: portfolio.risk_state().trading_halted,
        halt_reason: portfolio.risk_state().halt_reason.clone(),
        extra,
    }
}

/// Result of a parameter sweep: ranked summaries plus how many grid pairs
/// were skipped (sw >= lw, or otherwise invalid).
#[derive(Clone, Debug, PartialEq)]
pub struct SweepOutcome {
    pub summaries: Vec<RunSummary>,
    pub skipped_pairs: usize,
}

/// Run every (sw, lw) pair in row-major order over `short_grid` × `long_grid`,
/// skipping sw >= lw, then rank by (total_return desc, sharpe desc).
pub fn run_sweep(
    base: &BacktestConfig,
    short_grid: &[usize],
    long_grid: &[usize],
    ticks: &[Market],
) -> SweepOutcome {
    tracing::info!(
        short_grid_len = short_grid.len(),
        long_grid_len = long_grid.len(),
        "starting sweep"
    );

    let mut summaries = Vec::new();
    let mut skipped_pairs = 0;
    for &sw in short_grid {
        for &lw in long_grid {
            if sw >= lw {
                skipped_pairs += 1;
                continue;
            }
            match base.with_windows(sw, lw) {
                Ok(cfg) => summaries.push(run_backtest(&cfg, ticks)),
                Err(_) => skipped_pairs += 1,
            }
        }
    }

    summaries.sort_by(|a, b| {
        b.total_return
            .partial_cmp(&a.total_return)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.sharpe.partial_cmp(&a.sharpe).unwrap_or(std::cmp::Ordering::Equal))
    });

    tracing::info!(
        valid_pairs = summaries.len(),
        skipped_pairs,
        "sweep complete"
    );

    SweepOutcome { summaries, skipped_pairs }
}

/// Write ranked sweep summaries to CSV, flattening `extra` to a JSON string column.
pub fn export_summaries_csv(path: &Path, summaries: &[RunSummary]) -> Result<(), BacktestError> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "run_name",
        "symbols",
        "short_window",
        "long_window",
        "initial_cash",
        "final_equity",
        "total_return",
        "sharpe",
        "max_drawdown",
        "total_commission",
        "total_slippage_cost",
        "halted",
        "halt_reason",
        "extra",
    ])?;
    for s in summaries {
        wtr.write_record([
            s.run_name.clone(),
            s.symbols.join(";"),
            s.short_window.to_string(),
            s.long_window.to_string(),
            s.initial_cash.to_string(),
            s.final_equity.to_string(),
            s.total_return.to_string(),
            s.sharpe.to_string(),
            s.max_drawdown.to_string(),
            s.total_commission.to_string(),
            s.total_slippage_cost.to_string(),
            s.halted.to_string(),
            s.halt_reason.clone().unwrap_or_default(),
            s.extra.to_string(),
        ])?;
    }
    wtr.flush().map_err(|e| BacktestError::CsvExport(e.to_string()))?;
    Ok(())
}
