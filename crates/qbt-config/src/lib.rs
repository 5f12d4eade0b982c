//! Typed, validated backtest configuration.
//!
//! Raw config surfaces (a JSON/YAML file, CLI flags) are untyped
//! `serde_json::Value` documents, merged with `deep_merge` (CLI overrides
//! win over file values, which win over defaults — the same precedence as
//! a `_pick(cli, file, default)` helper), then converted into
//! [`BacktestConfig`] at a single validation boundary. Every numeric bound
//! lives on the crate that owns the behavior it constrains; this crate only
//! picks fields out of the merged document and forwards them.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use qbt_execution::{ExecutionConfig, MicrostructureConfig};
use qbt_portfolio::{PortfolioConfig, RiskConfig};
use qbt_strategy::MaCrossConfig;

/// Errors raised while converting a merged config document into typed,
/// validated structs.
#[derive(Debug)]
pub enum ConfigError {
    MissingField(&'static str),
    WrongType { field: &'static str, expected: &'static str },
    Strategy(qbt_strategy::ConfigError),
    Execution(qbt_execution::ConfigError),
    Portfolio(qbt_portfolio::ConfigError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingField(field) => write!(f, "missing required field: {field}"),
            ConfigError::WrongType { field, expected } => {
                write!(f, "field {field} must be {expected}")
            }
            ConfigError::Strategy(e) => write!(f, "{e}"),
            ConfigError::Execution(e) => write!(f, "{e}"),
            ConfigError::Portfolio(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<qbt_strategy::ConfigError> for ConfigError {
    fn from(e: qbt_strategy::ConfigError) -> Self {
        ConfigError::Strategy(e)
    }
}

impl From<qbt_execution::ConfigError> for ConfigError {
    fn from(e: qbt_execution::ConfigError) -> Self {
        ConfigError::Execution(e)
    }
}

impl From<qbt_portfolio::ConfigError> for ConfigError {
    fn from(e: qbt_portfolio::ConfigError) -> Self {
        ConfigError::Portfolio(e)
    }
}

/// Load a JSON or YAML file (by extension) into an untyped `Value`.
pub fn load_file(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&raw).with_context(|| format!("parse yaml: {}", path.display()))?;
        serde_json::to_value(yaml_val).context("yaml -> json conversion failed")
    } else {
        serde_json::from_str(&raw).with_context(|| format!("parse json: {}", path.display()))
    }
}

/// Deep-merge `src` into `dst`: objects merge recursively, arrays and
/// scalars are replaced wholesale. `src` wins on conflicts.
pub fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

fn get<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    v.get(key).filter(|v| !v.is_null())
}

fn pick_str(v: &Value, field: &'static str) -> Result<String, ConfigError> {
    get(v, field)
        .and_then(|x| x.as_str())
        .map(|s| s.to_string())
        .ok_or(ConfigError::MissingField(field))
}

fn pick_str_or(v: &Value, field: &'static str, default: &str) -> Result<String, ConfigError> {
    match get(v, field) {
        None => Ok(default.to_string()),
        Some(x) => x
            .as_str()
            .map(|s| s.to_string())
            .ok_or(ConfigError::WrongType { field, expected: "a string" }),
    }
}

fn pick_opt_str(v: &Value, field: &'static str) -> Result<Option<String>, ConfigError> {
    match get(v, field) {
        None => Ok(None),
        Some(x) => x
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or(ConfigError::WrongType { field, expected: "a string" }),
    }
}

fn pick_f64(v: &Value, field: &'static str) -> Result<f64, ConfigError> {
    get(v, field)
        .and_then(|x| x.as_f64())
        .ok_or(ConfigError::MissingField(field))
}

fn pick_f64_or(v: &Value, field: &'static str, default: f64) -> Result<f64, ConfigError> {
    match get(v, field) {
        None => Ok(default),
        Some(x) => x
            .as_f64()
            .ok_or(ConfigError::WrongType { field, expected: "a number" }),
    }
}

fn pick_i64_or(v: &Value, field: &'static str, default: i64) -> Result<i64, ConfigError> {
    match get(v, field) {
        None => Ok(default),
        Some(x) => x
            .as_i64()
            .ok_or(ConfigError::WrongType { field, expected: "an integer" }),
    }
}

fn pick_usize(v: &Value, field: &'static str) -> Result<usize, ConfigError> {
    get(v, field)
        .and_then(|x| x.as_u64())
        .map(|x| x as usize)
        .ok_or(ConfigError::MissingField(field))
}

fn pick_u64_or(v: &Value, field: &'static str, default: u64) -> Result<u64, ConfigError> {
    match get(v, field) {
        None => Ok(default),
        Some(x) => x
            .as_u64()
            .ok_or(ConfigError::WrongType { field, expected: "a non-negative integer" }),
    }
}

/// `symbols` may be a JSON array of strings or a single comma-separated string.
fn pick_symbols(v: &Value) -> Result<Vec<String>, ConfigError> {
    match get(v, "symbols") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|x| {
                x.as_str()
                    .map(|s| s.trim().to_string())
                    .ok_or(ConfigError::WrongType { field: "symbols", expected: "strings" })
            })
            .collect(),
        Some(Value::String(s)) => Ok(s.split(',').map(|p| p.trim().to_string()).collect()),
        Some(_) => Err(ConfigError::WrongType {
            field: "symbols",
            expected: "an array or comma-separated string",
        }),
        None => Err(ConfigError::MissingField("symbols")),
    }
}

fn pick_usize_grid(v: &Value, field: &'static str) -> Result<Option<Vec<usize>>, ConfigError> {
    match get(v, field) {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(
            items
                .iter()
                .map(|x| {
                    x.as_u64()
                        .map(|n| n as usize)
                        .ok_or(ConfigError::WrongType { field, expected: "an array of integers" })
                })
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Some(_) => Err(ConfigError::WrongType { field, expected: "an array of integers" }),
    }
}

/// A fully validated, typed backtest configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct BacktestConfig {
    pub symbols: Vec<String>,
    pub csv_path: String,
    pub run_name: String,
    pub out_dir: String,
    pub database_url: Option<String>,
    pub short_window: usize,
    pub long_window: usize,
    pub short_grid: Option<Vec<usize>>,
    pub long_grid: Option<Vec<usize>>,
    pub initial_cash: f64,
    pub trade_quantity: i64,
    pub commission_per_trade: f64,
    pub strategy: MaCrossConfig,
    pub portfolio: PortfolioConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
}

impl BacktestConfig {
    /// Convert a merged config document into validated, typed config.
    pub fn from_value(v: &Value) -> Result<Self, ConfigError> {
        let symbols = pick_symbols(v)?;
        let csv_path = pick_str(v, "csv_path")?;
        let run_name = pick_str_or(v, "run_name", "run")?;
        let out_dir = pick_str_or(v, "out_dir", "out")?;
        let database_url = pick_opt_str(v, "database_url")?;
        let short_window = pick_usize(v, "short_window")?;
        let long_window = pick_usize(v, "long_window")?;
        let short_grid = pick_usize_grid(v, "short_grid")?;
        let long_grid = pick_usize_grid(v, "long_grid")?;
        let initial_cash = pick_f64(v, "initial_cash")?;
        let trade_quantity = pick_i64_or(v, "trade_quantity", 1)?;
        let commission_per_trade = pick_f64_or(v, "commission_per_trade", 0.0)?;

        let strategy = MaCrossConfig::new(symbols.clone(), short_window, long_window)?;
        let portfolio = PortfolioConfig::new(initial_cash)?;

        let risk_obj = get(v, "risk").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let max_position_per_symbol = pick_i64_or(&risk_obj, "max_position_per_symbol", 1_000_000)?;
        let stop_loss_pct = pick_f64_or(&risk_obj, "stop_loss_pct", 0.0)?;
        let max_drawdown_pct = pick_f64_or(&risk_obj, "max_drawdown_pct", 1.0)?;
        let risk = RiskConfig::new(max_position_per_symbol, stop_loss_pct, max_drawdown_pct)?;

        let exec_obj = get(v, "execution").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let default_spread_bps = pick_f64_or(&exec_obj, "default_spread_bps", 0.0)?;
        let impact_bps_per_unit = pick_f64_or(&exec_obj, "impact_bps_per_unit", 0.0)?;
        let impact_volume = pick_f64_or(&exec_obj, "impact_volume", 1000.0)?;
        let rng_seed = pick_u64_or(&exec_obj, "rng_seed", 0)?;

        let micro_obj = get(&exec_obj, "micro").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let latency_events = pick_u64_or(&micro_obj, "latency_events", 0)?;
        let default_tick_volume = pick_f64_or(&micro_obj, "default_tick_volume", 1000.0)?;
        let max_participation_rate = pick_f64_or(&micro_obj, "max_participation_rate", 1.0)?;
        let queue_ahead_fraction = pick_f64_or(&micro_obj, "queue_ahead_fraction", 0.0)?;
        let base_fill_probability = pick_f64_or(&micro_obj, "base_fill_probability", 1.0)?;

        let micro = MicrostructureConfig::new(
            latency_events,
            default_tick_volume,
            max_participation_rate,
            queue_ahead_fraction,
            base_fill_probability,
        )?;
        let execution =
            ExecutionConfig::new(default_spread_bps, impact_bps_per_unit, impact_volume, rng_seed, micro)?;

        Ok(Self {
            symbols,
            csv_path,
            run_name,
            out_dir,
            database_url,
            short_window,
            long_window,
            short_grid,
            long_grid,
            initial_cash,
            trade_quantity,
            commission_per_trade,
            strategy,
            portfolio,
            risk,
            execution,
        })
    }

    /// Derive a per-(sw,lw) sweep variant: same config, different windows and
    /// a deterministic run name, matching §4.H's `f"{base}-sw{sw}-lw{lw}"`.
    pub fn with_windows(&self, sw: usize, lw: usize) -> Result<Self, ConfigError> {
        let strategy = MaCrossConfig::new(self.symbols.clone(), sw, lw)?;
        Ok(Self {
            run_name: format!("{}-sw{}-lw{}", self.run_name, sw, lw),
            short_window: sw,
            long_window: lw,
            strategy,
            ..self.clone()
        })
    }

    /// Flattened effective config as JSON, for `--dry-run` and for the
    /// `extra` column persisted alongside a `RunSummary`.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("symbols".into(), Value::from(self.symbols.clone()));
        map.insert("csv_path".into(), Value::from(self.csv_path.clone()));
        map.insert("run_name".into(), Value::from(self.run_name.clone()));
        map.insert("out_dir".into(), Value::from(self.out_dir.clone()));
        map.insert(
            "database_url".into(),
            self.database_url.clone().map(Value::from).unwrap_or(Value::Null),
        );
        map.insert("short_window".into(), Value::from(self.short_window as u64));
        map.insert("long_window".into(), Value::from(self.long_window as u64));
        map.insert("initial_cash".into(), Value::from(self.initial_cash));
        map.insert("trade_quantity".into(), Value::from(self.trade_quantity));
        map.insert("commission_per_trade".into(), Value::from(self.commission_per_trade));

        let mut risk_map = BTreeMap::new();
        risk_map.insert("max_position_per_symbol", Value::from(self.risk.max_position_per_symbol));
        risk_map.insert("stop_loss_pct", Value::from(self.risk.stop_loss_pct));
        risk_map.insert("max_drawdown_pct", Value::from(self.risk.max_drawdown_pct));
        map.insert("risk".into(), serde_json::to_value(risk_map).unwrap());

        let mut exec_map = serde_json::Map::new();
        exec_map.insert("default_spread_bps".into(), Value::from(self.execution.default_spread_bps));
        exec_map.insert("impact_bps_per_unit".into(), Value::from(self.execution.impact_bps_per_unit));
        exec_map.insert("impact_volume".into(), Value::from(self.execution.impact_volume));
        exec_map.insert("rng_seed".into(), Value::from(self.execution.rng_seed));
        let micro = &self.execution.micro;
        let mut micro_map = serde_json::Map::new();
        micro_map.insert("latency_events".into(), Value::from(micro.latency_events));
        micro_map.insert("default_tick_volume".into(), Value::from(micro.default_tick_volume));
        micro_map.insert("max_participation_rate".into(), Value::from(micro.max_participation_rate));
        micro_map.insert("queue_ahead_fraction".into(), Value::from(micro.queue_ahead_fraction));
        micro_map.insert("base_fill_probability".into(), Value::from(micro.base_fill_probability));
        exec_map.insert("micro".into(), Value::Object(micro_map));
        map.insert("execution".into(), Value::Object(exec_map));

        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_doc() -> Value {
        json!({
            "symbols": "AAPL, MSFT",
            "csv_path": "ticks.csv",
            "short_window": 5,
            "long_window": 20,
            "initial_cash": 100000.0,
        })
    }

    #[test]
    fn deep_merge_overrides_scalars_and_merges_objects() {
        let mut base = json!({"a": 1, "risk": {"stop_loss_pct": 0.05}});
        let overlay = json!({"a": 2, "risk": {"max_drawdown_pct": 0.2}});
        deep_merge(&mut base, overlay);
        assert_eq!(base["a"], 2);
        assert_eq!(base["risk"]["stop_loss_pct"], 0.05);
        assert_eq!(base["risk"]["max_drawdown_pct"], 0.2);
    }

    #[test]
    fn symbols_accepts_comma_list_or_array() {
        let doc = minimal_doc();
        let cfg = BacktestConfig::from_value(&doc).unwrap();
        assert_eq!(cfg.symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);

        let doc2 = json!({
            "symbols": ["AAPL", "MSFT"],
            "csv_path": "x.csv",
            "short_window": 5,
            "long_window": 20,
            "initial_cash": 1000.0,
        });
        let cfg2 = BacktestConfig::from_value(&doc2).unwrap();
        assert_eq!(cfg2.symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let doc = json!({"symbols": "AAPL"});
        let err = BacktestConfig::from_value(&doc).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("csv_path")));
    }

    #[test]
    fn invalid_window_bubbles_up_as_strategy_error() {
        let doc = json!({
            "symbols": "AAPL",
            "csv_path": "x.csv",
            "short_window": 20,
            "long_window": 5,
            "initial_cash": 1000.0,
        });
        let err = BacktestConfig::from_value(&doc).unwrap_err();
        assert!(matches!(err, ConfigError::Strategy(_)));
    }

    #[test]
    fn with_windows_renames_run_and_swaps_windows() {
        let doc = minimal_doc();
        let cfg = BacktestConfig::from_value(&doc).unwrap();
        let swept = cfg.with_windows(3, 9).unwrap();
        assert_eq!(swept.run_name, "run-sw3-lw9");
        assert_eq!(swept.short_window, 3);
        assert_eq!(swept.long_window, 9);
    }

    #[test]
    fn to_json_round_trips_core_fields() {
        let doc = minimal_doc();
        let cfg = BacktestConfig::from_value(&doc).unwrap();
        let json = cfg.to_json();
        assert_eq!(json["initial_cash"], 100000.0);
        assert_eq!(json["short_window"], 5);
    }
}
