//! Portfolio accounting and the risk state machine.
//!
//! `Portfolio` is the single owner of cash, per-symbol positions, the
//! incrementally maintained equity accumulator, and the drawdown halt latch.
//! Every method is a pure state transition over `&mut self` — no IO, no
//! clock reads, no randomness.

use std::collections::HashMap;
use std::fmt;

use qbt_types::{Fill, Side};

/// Construction-time validation error for portfolio/risk configs.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    NonPositive { field: &'static str, value: f64 },
    NonPositiveInt { field: &'static str, value: i64 },
    OutOfUnitRange { field: &'static str, value: f64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NonPositive { field, value } => {
                write!(f, "{field} must be > 0, got {value}")
            }
            ConfigError::NonPositiveInt { field, value } => {
                write!(f, "{field} must be > 0, got {value}")
            }
            ConfigError::OutOfUnitRange { field, value } => {
                write!(f, "{field} must be in [0, 1], got {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Starting capital for a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PortfolioConfig {
    pub initial_cash: f64,
}

impl PortfolioConfig {
    pub fn new(initial_cash: f64) -> Result<Self, ConfigError> {
        if initial_cash <= 0.0 {
            return Err(ConfigError::NonPositive {
                field: "initial_cash",
                value: initial_cash,
            });
        }
        Ok(Self { initial_cash })
    }
}

/// Per-symbol position cap, stop-loss and drawdown-halt thresholds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RiskConfig {
    pub max_position_per_symbol: i64,
    pub stop_loss_pct: f64,
    pub max_drawdown_pct: f64,
}

impl RiskConfig {
    pub fn new(
        max_position_per_symbol: i64,
        stop_loss_pct: f64,
        max_drawdown_pct: f64,
    ) -> Result<Self, ConfigError> {
        if max_position_per_symbol <= 0 {
            return Err(ConfigError::NonPositiveInt {
                field: "max_position_per_symbol",
                value: max_position_per_symbol,
            });
        }
        if !(0.0..=1.0).contains(&stop_loss_pct) {
            return Err(ConfigError::OutOfUnitRange {
                field: "stop_loss_pct",
                value: stop_loss_pct,
            });
        }
        if !(0.0..=1.0).contains(&max_drawdown_pct) {
            return Err(ConfigError::OutOfUnitRange {
                field: "max_drawdown_pct",
                value: max_drawdown_pct,
            });
        }
        Ok(Self {
            max_position_per_symbol,
            stop_loss_pct,
            max_drawdown_pct,
        })
    }
}

/// A single symbol's holding: signed quantity and share-weighted average cost.
///
/// `quantity == 0` implies `avg_cost == 0.0`; see [`Portfolio::on_fill`] for
/// the same-direction / reduce / sign-flip update rules.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Position {
    pub quantity: i64,
    pub avg_cost: f64,
}

/// The drawdown halt latch. Once `trading_halted` is true it stays true for
/// the life of the run — this is checked only at the event-loop level.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct RiskState {
    pub trading_halted: bool,
    pub halt_reason: Option<String>,
}

/// Cash, positions, equity tracking and the risk latch for one run.
pub struct Portfolio {
    risk: RiskConfig,
    cash: f64,
    positions: HashMap<String, Position>,
    last_mid: HashMap<String, f64>,
    equity: f64,
    peak_equity: f64,
    equity_curve: Vec<f64>,
    total_commission: f64,
    total_slippage_cost: f64,
    risk_state: RiskState,
}

impl Portfolio {
    pub fn new(config: PortfolioConfig, risk: RiskConfig) -> Self {
        Self {
            risk,
            cash: config.initial_cash,
            positions: HashMap::new(),
            last_mid: HashMap::new(),
            equity: config.initial_cash,
            peak_equity: config.initial_cash,
            equity_curve: Vec::new(),
            total_commission: 0.0,
            total_slippage_cost: 0.0,
            risk_state: RiskState::default(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn equity_curve(&self) -> &[f64] {
        &self.equity_curve
    }

    pub fn total_commission(&self) -> f64 {
        self.total_commission
    }

    pub fn total_slippage_cost(&self) -> f64 {
        self.total_slippage_cost
    }

    pub fn risk_state(&self) -> &RiskState {
        &self.risk_state
    }

    /// Returns the existing position for `sym`, creating a zero-position
    /// entry if none exists. Side-effecting access is permitted: the zero
    /// position is the additive identity.
    pub fn get_position(&mut self, sym: &str) -> &Position {
        self.positions.entry(sym.to_string()).or_default()
    }

    /// True iff the resulting absolute position would stay within the cap.
    pub fn can_place_order(&self, sym: &str, side: Side, qty: i64) -> bool {
        let current = self.positions.get(sym).map(|p| p.quantity).unwrap_or(0);
        let projected = current + side.sign() * qty;
        projected.abs() <= self.risk.max_position_per_symbol
    }

    /// Apply a fill: cash, commission/slippage accumulators, the position,
    /// and the equity accumulator, in that order.
    pub fn on_fill(&mut self, fill: &Fill) {
        let signed_qty = fill.signed_qty();
        let cash_delta = -(fill.fill_price * signed_qty as f64) - fill.commission;
        self.cash += cash_delta;
        self.total_commission += fill.commission;
        self.total_slippage_cost += fill.slippage * signed_qty as f64;

        let pos = self.positions.entry(fill.symbol.clone()).or_default();
        let old_qty = pos.quantity;
        let new_qty = old_qty + signed_qty;

        let new_avg_cost = if new_qty == 0 {
            0.0
        } else if old_qty == 0 || old_qty.signum() == signed_qty.signum() {
            // Opening or adding in the same direction: share-weighted mean.
            let old_abs = old_qty.unsigned_abs() as f64;
            let delta_abs = signed_qty.unsigned_abs() as f64;
            (old_abs * pos.avg_cost + delta_abs * fill.fill_price) / (old_abs + delta_abs)
        } else if new_qty.signum() == old_qty.signum() {
            // Reducing without crossing zero: cost basis is unchanged.
            pos.avg_cost
        } else {
            // Sign flip: the flipped remainder's basis is the fill price.
            fill.fill_price
        };

        pos.quantity = new_qty;
        pos.avg_cost = new_avg_cost;

        let qty_delta = (new_qty - old_qty) as f64;
        match self.last_mid.get(&fill.symbol) {
            Some(&mid) => {
                self.equity += cash_delta + qty_delta * mid;
            }
            None => {
                self.equity = self.cash
                    + self
                        .positions
                        .iter()
                        .filter_map(|(sym, p)| self.last_mid.get(sym).map(|&mid| p.quantity as f64 * mid))
                        .sum::<f64>();
            }
        }
    }

    /// Mark one symbol to a new mid, update equity and the equity curve, and
    /// evaluate the drawdown halt latch.
    pub fn mark_to_market(&mut self, sym: &str, mid: f64) {
        let qty = self.positions.get(sym).map(|p| p.quantity).unwrap_or(0) as f64;
        let delta_equity = match self.last_mid.get(sym) {
            Some(&prev_mid) => qty * (mid - prev_mid),
            None => qty * mid,
        };
        self.equity += delta_equity;
        self.last_mid.insert(sym.to_string(), mid);
        self.equity_curve.push(self.equity);

        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }

        if !self.risk_state.trading_halted && self.peak_equity > 0.0 {
            let drawdown = (self.peak_equity - self.equity) / self.peak_equity;
            if drawdown >= self.risk.max_drawdown_pct {
                self.risk_state.trading_halted = true;
                self.risk_state.halt_reason =
                    Some(format!("Max drawdown reached: {:.2}%", drawdown * 100.0));
            }
        }
    }

    /// Returns a liquidating side if `sym`'s position has crossed its
    /// stop-loss threshold; `None` for flat positions, unknown mids, or a
    /// zero cost basis.
    pub fn check_stop_loss(&self, sym: &str) -> Option<Side> {
        let pos = self.positions.get(sym)?;
        if pos.quantity == 0 || pos.avg_cost == 0.0 {
            return None;
        }
        let mid = *self.last_mid.get(sym)?;
        if pos.quantity > 0 && mid <= pos.avg_cost * (1.0 - self.risk.stop_loss_pct) {
            Some(Side::Sell)
        } else if pos.quantity < 0 && mid >= pos.avg_cost * (1.0 + self.risk.stop_loss_pct) {
            Some(Side::Buy)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn fill(side: Side, qty: i64, price: f64, commission: f64, slippage: f64) -> Fill {
        Fill::new(ts(), "AAPL", side, qty, price, commission, slippage).unwrap()
    }

    fn portfolio(initial_cash: f64, max_drawdown_pct: f64) -> Portfolio {
        let cfg = PortfolioConfig::new(initial_cash).unwrap();
        let risk = RiskConfig::new(1_000_000, 0.05, max_drawdown_pct).unwrap();
        Portfolio::new(cfg, risk)
    }

    #[test]
    fn same_direction_fills_share_weighted_average() {
        let mut pf = portfolio(100_000.0, 0.5);
        pf.on_fill(&fill(Side::Buy, 100, 10.0, 0.0, 0.0));
        pf.on_fill(&fill(Side::Buy, 100, 20.0, 0.0, 0.0));
        let pos = pf.get_position("AAPL");
        assert_eq!(pos.quantity, 200);
        assert!((pos.avg_cost - 15.0).abs() < 1e-9);
    }

    #[test]
    fn reducing_fill_preserves_avg_cost() {
        let mut pf = portfolio(100_000.0, 0.5);
        pf.on_fill(&fill(Side::Buy, 100, 10.0, 0.0, 0.0));
        pf.on_fill(&fill(Side::Sell, 40, 50.0, 0.0, 0.0));
        let pos = pf.get_position("AAPL");
        assert_eq!(pos.quantity, 60);
        assert!((pos.avg_cost - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sign_flip_resets_avg_cost_to_fill_price() {
        let mut pf = portfolio(100_000.0, 0.5);
        pf.on_fill(&fill(Side::Buy, 100, 10.0, 0.0, 0.0));
        pf.on_fill(&fill(Side::Sell, 150, 20.0, 0.0, 0.0));
        let pos = pf.get_position("AAPL");
        assert_eq!(pos.quantity, -50);
        assert!((pos.avg_cost - 20.0).abs() < 1e-9);
    }

    #[test]
    fn flat_position_resets_avg_cost_to_zero() {
        let mut pf = portfolio(100_000.0, 0.5);
        pf.on_fill(&fill(Side::Buy, 100, 10.0, 0.0, 0.0));
        pf.on_fill(&fill(Side::Sell, 100, 12.0, 0.0, 0.0));
        let pos = pf.get_position("AAPL");
        assert_eq!(pos.quantity, 0);
        assert_eq!(pos.avg_cost, 0.0);
    }

    #[test]
    fn equity_invariant_holds_after_fills_and_marks() {
        let mut pf = portfolio(100_000.0, 0.9);
        pf.mark_to_market("AAPL", 100.0);
        pf.on_fill(&fill(Side::Buy, 100, 100.0, 1.0, 0.0));
        pf.mark_to_market("AAPL", 105.0);

        let qty = pf.get_position("AAPL").quantity as f64;
        let expected_equity = pf.cash() + qty * 105.0;
        assert!((pf.equity() - expected_equity).abs() < 1e-6);
    }

    #[test]
    fn drawdown_halt_latches_s3() {
        let mut pf = portfolio(100_000.0, 0.20);
        pf.mark_to_market("AAPL", 100.0); // equity 100_000, peak 100_000
        pf.on_fill(&fill(Side::Buy, 1, 0.0, 0.0, 0.0)); // no-op-ish, keep state simple
        // Drive equity down via repeated marks on a short synthetic position.
        pf.on_fill(&fill(Side::Sell, 1000, 100.0, 0.0, 0.0));
        pf.mark_to_market("AAPL", 121.0); // short position loses money as price rises
        assert!(pf.risk_state().trading_halted);
        assert!(pf
            .risk_state()
            .halt_reason
            .as_deref()
            .unwrap()
            .starts_with("Max drawdown reached:"));
    }

    #[test]
    fn halt_latch_stays_true_once_set() {
        let mut pf = portfolio(100_000.0, 0.10);
        pf.mark_to_market("AAPL", 100.0);
        pf.on_fill(&fill(Side::Sell, 2000, 100.0, 0.0, 0.0));
        pf.mark_to_market("AAPL", 105.0);
        assert!(pf.risk_state().trading_halted);
        pf.mark_to_market("AAPL", 95.0); // equity recovers, halt must still hold
        assert!(pf.risk_state().trading_halted);
    }

    #[test]
    fn stop_loss_triggers_sell_for_long_position_s4() {
        let mut pf = portfolio(100_000.0, 0.9);
        pf.mark_to_market("AAPL", 100.0);
        pf.on_fill(&fill(Side::Buy, 100, 100.0, 0.0, 0.0));
        pf.mark_to_market("AAPL", 95.0);
        assert_eq!(pf.check_stop_loss("AAPL"), Some(Side::Sell));
    }

    #[test]
    fn stop_loss_none_for_flat_or_unknown_mid() {
        let pf = portfolio(100_000.0, 0.9);
        assert_eq!(pf.check_stop_loss("AAPL"), None);
    }

    #[test]
    fn can_place_order_respects_max_position_cap() {
        let cfg = PortfolioConfig::new(100_000.0).unwrap();
        let risk = RiskConfig::new(100, 0.05, 0.5).unwrap();
        let mut pf = Portfolio::new(cfg, risk);
        pf.on_fill(&fill(Side::Buy, 90, 10.0, 0.0, 0.0));
        assert!(pf.can_place_order("AAPL", Side::Buy, 10));
        assert!(!pf.can_place_order("AAPL", Side::Buy, 11));
    }

    #[test]
    fn peak_equity_never_decreases() {
        let mut pf = portfolio(100_000.0, 0.9);
        pf.mark_to_market("AAPL", 100.0);
        pf.on_fill(&fill(Side::Buy, 100, 100.0, 0.0, 0.0));
        let mut last_peak = pf.peak_equity();
        for mid in [110.0, 90.0, 120.0, 80.0] {
            pf.mark_to_market("AAPL", mid);
            assert!(pf.peak_equity() >= last_peak);
            last_peak = pf.peak_equity();
        }
    }
}
