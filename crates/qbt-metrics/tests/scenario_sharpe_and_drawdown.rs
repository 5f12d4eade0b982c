use qbt_metrics::{max_drawdown, returns_from_equity, sharpe_ratio, DEFAULT_TRADING_DAYS};

#[test]
fn flat_equity_curve_has_zero_sharpe_and_zero_drawdown() {
    let equity = vec![100_000.0; 10];
    let returns = returns_from_equity(&equity);
    assert_eq!(sharpe_ratio(&returns, DEFAULT_TRADING_DAYS), 0.0);
    assert_eq!(max_drawdown(&equity), 0.0);
}

#[test]
fn steady_uptrend_has_a_positive_sharpe_and_no_drawdown() {
    let equity: Vec<f64> = (0..20).map(|i| 100_000.0 + i as f64 * 100.0).collect();
    let returns = returns_from_equity(&equity);
    assert!(sharpe_ratio(&returns, DEFAULT_TRADING_DAYS) > 0.0);
    assert_eq!(max_drawdown(&equity), 0.0);
}

#[test]
fn drawdown_measures_the_worst_peak_to_trough_decline() {
    let equity = vec![100_000.0, 110_000.0, 88_000.0, 95_000.0, 120_000.0, 90_000.0];
    // Worst decline is the final leg, 120_000 -> 90_000 = 25%.
    let dd = max_drawdown(&equity);
    assert!((dd - 0.25).abs() < 1e-9);
}

#[test]
fn too_short_a_series_yields_zero_sharpe() {
    assert_eq!(sharpe_ratio(&[0.01], DEFAULT_TRADING_DAYS), 0.0);
    assert_eq!(sharpe_ratio(&[], DEFAULT_TRADING_DAYS), 0.0);
}
