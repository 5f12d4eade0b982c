//! Equity-curve metrics: returns, Sharpe ratio, max drawdown.
//!
//! Pure functions over `&[f64]` with no knowledge of portfolio/position
//! internals — any equity-like series can be fed through this crate.

/// Trading days per year used to annualize the Sharpe ratio unless the
/// caller supplies a different horizon.
pub const DEFAULT_TRADING_DAYS: f64 = 252.0;

/// Simple period-over-period returns. Empty or single-point curves yield an
/// empty sequence (there is no return to compute).
pub fn returns_from_equity(equity_curve: &[f64]) -> Vec<f64> {
    if equity_curve.len() < 2 {
        return Vec::new();
    }
    equity_curve
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Annualized Sharpe ratio: mean(returns) / stdev(returns, ddof=1) * sqrt(T).
/// Zero for an empty series or a zero sample standard deviation.
pub fn sharpe_ratio(returns: &[f64], trading_days: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    if returns.len() < 2 {
        return 0.0;
    }
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stdev = variance.sqrt();
    if stdev == 0.0 {
        return 0.0;
    }
    (mean / stdev) * trading_days.sqrt()
}

/// Maximum drawdown over the running peak, in `[0, 1)`. Empty input is 0.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        let drawdown = if peak > 0.0 { (peak - eq) / peak } else { 0.0 };
        if drawdown > worst {
            worst = drawdown;
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_empty_for_short_curves() {
        assert!(returns_from_equity(&[]).is_empty());
        assert!(returns_from_equity(&[100.0]).is_empty());
    }

    #[test]
    fn returns_computed_pointwise() {
        let r = returns_from_equity(&[100.0, 110.0, 99.0]);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.10).abs() < 1e-9);
        assert!((r[1] - (-0.1)).abs() < 1e-9);
    }

    #[test]
    fn sharpe_zero_for_empty_or_constant_returns() {
        assert_eq!(sharpe_ratio(&[], DEFAULT_TRADING_DAYS), 0.0);
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], DEFAULT_TRADING_DAYS), 0.0);
    }

    #[test]
    fn sharpe_positive_for_upward_drifting_returns() {
        let r = [0.01, 0.02, -0.005, 0.015, 0.01];
        let s = sharpe_ratio(&r, DEFAULT_TRADING_DAYS);
        assert!(s > 0.0);
    }

    #[test]
    fn max_drawdown_tracks_running_peak() {
        let eq = [100.0, 120.0, 90.0, 110.0, 60.0];
        let dd = max_drawdown(&eq);
        // Worst point is 60 against a running peak of 120 => 0.5.
        assert!((dd - 0.5).abs() < 1e-9);
    }

    #[test]
    fn max_drawdown_empty_is_zero() {
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn max_drawdown_in_unit_range() {
        let eq = [100.0, 50.0, 200.0, 10.0];
        let dd = max_drawdown(&eq);
        assert!((0.0..1.0).contains(&dd));
    }
}
