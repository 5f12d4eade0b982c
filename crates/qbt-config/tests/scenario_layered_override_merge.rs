use serde_json::json;

use qbt_config::{deep_merge, BacktestConfig};

#[test]
fn cli_overrides_win_over_file_values() {
    let mut base = json!({
        "symbols": ["AAPL"],
        "csv_path": "ticks.csv",
        "short_window": 5,
        "long_window": 20,
        "initial_cash": 50_000.0,
        "risk": { "stop_loss_pct": 0.02 },
    });
    let overrides = json!({
        "short_window": 3,
        "commission_per_trade": 1.5,
    });

    deep_merge(&mut base, overrides);

    let config = BacktestConfig::from_value(&base).unwrap();
    assert_eq!(config.short_window, 3);
    assert_eq!(config.long_window, 20, "untouched fields survive the merge");
    assert_eq!(config.commission_per_trade, 1.5);
    assert_eq!(config.risk.stop_loss_pct, 0.02, "nested objects merge, not overwrite wholesale");
}

#[test]
fn with_windows_derives_a_sweep_variant_with_a_suffixed_run_name() {
    let doc = json!({
        "symbols": "AAPL,MSFT",
        "csv_path": "ticks.csv",
        "run_name": "baseline",
        "short_window": 5,
        "long_window": 20,
        "initial_cash": 50_000.0,
    });
    let base = BacktestConfig::from_value(&doc).unwrap();
    assert_eq!(base.symbols, vec!["AAPL", "MSFT"]);

    let variant = base.with_windows(2, 8).unwrap();
    assert_eq!(variant.run_name, "baseline-sw2-lw8");
    assert_eq!(variant.short_window, 2);
    assert_eq!(variant.long_window, 8);
    // Everything else is carried over unchanged.
    assert_eq!(variant.initial_cash, base.initial_cash);
}

#[test]
fn missing_required_field_is_rejected() {
    let doc = json!({ "csv_path": "ticks.csv", "short_window": 5, "long_window": 20, "initial_cash": 1.0 });
    assert!(BacktestConfig::from_value(&doc).is_err());
}
