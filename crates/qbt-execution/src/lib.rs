//! Execution microstructure simulator.
//!
//! Owns a per-symbol FIFO of pending orders and the single seeded RNG that
//! is the only source of nondeterminism anywhere in the core. Given an
//! identical config (including `rng_seed`) and tick stream, the produced
//! `Fill` sequence is byte-identical across runs — no other module reads
//! or owns randomness.
//!
//! # Per-tick algorithm
//! 1. Compute this tick's fillable capacity from volume × participation rate.
//! 2. Walk the FIFO head to tail at most once per order currently queued:
//!    latency-gate, then (for LIMIT) touch + queue-position gate, then fill
//!    up to the smaller of remaining capacity and order size.
//! 3. Partially filled orders rotate to the tail so others get a turn; fully
//!    filled orders are dropped. A LIMIT order missing its price is dropped
//!    outright — that is documented behavior, not an error.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use qbt_types::{Fill, Market, Order, OrderType, Side};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Construction-time validation error for execution configs.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    Negative { field: &'static str, value: f64 },
    NonPositive { field: &'static str, value: f64 },
    OutOfUnitRange { field: &'static str, value: f64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Negative { field, value } => {
                write!(f, "{field} must be >= 0, got {value}")
            }
            ConfigError::NonPositive { field, value } => {
                write!(f, "{field} must be > 0, got {value}")
            }
            ConfigError::OutOfUnitRange { field, value } => {
                write!(f, "{field} must be in [0, 1], got {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Queueing, partial-fill and latency behavior of the simulated microstructure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MicrostructureConfig {
    /// Number of market events an order must wait through before it is eligible to fill.
    pub latency_events: u64,
    /// Assumed available volume for a tick that carries no `volume` field.
    pub default_tick_volume: f64,
    /// Fraction of a tick's volume that may be consumed across all queued orders.
    pub max_participation_rate: f64,
    /// Modeled fraction of resting liquidity ahead of our LIMIT order.
    pub queue_ahead_fraction: f64,
    /// Base probability of filling once a LIMIT order's price is touched.
    pub base_fill_probability: f64,
}

impl MicrostructureConfig {
    pub fn new(
        latency_events: u64,
        default_tick_volume: f64,
        max_participation_rate: f64,
        queue_ahead_fraction: f64,
        base_fill_probability: f64,
    ) -> Result<Self, ConfigError> {
        if default_tick_volume <= 0.0 {
            return Err(ConfigError::NonPositive {
                field: "default_tick_volume",
                value: default_tick_volume,
            });
        }
        if !(0.0..=1.0).contains(&max_participation_rate) {
            return Err(ConfigError::OutOfUnitRange {
                field: "max_participation_rate",
                value: max_participation_rate,
            });
        }
        if !(0.0..=1.0).contains(&queue_ahead_fraction) {
            return Err(ConfigError::OutOfUnitRange {
                field: "queue_ahead_fraction",
                value: queue_ahead_fraction,
            });
        }
        if !(0.0..=1.0).contains(&base_fill_probability) {
            return Err(ConfigError::OutOfUnitRange {
                field: "base_fill_probability",
                value: base_fill_probability,
            });
        }
        Ok(Self {
            latency_events,
            default_tick_volume,
            max_participation_rate,
            queue_ahead_fraction,
            base_fill_probability,
        })
    }
}

/// Slippage/impact model config plus the simulator's RNG seed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExecutionConfig {
    pub default_spread_bps: f64,
    pub impact_bps_per_unit: f64,
    pub impact_volume: f64,
    pub rng_seed: u64,
    pub micro: MicrostructureConfig,
}

impl ExecutionConfig {
    pub fn new(
        default_spread_bps: f64,
        impact_bps_per_unit: f64,
        impact_volume: f64,
        rng_seed: u64,
        micro: MicrostructureConfig,
    ) -> Result<Self, ConfigError> {
        if default_spread_bps < 0.0 {
            return Err(ConfigError::Negative {
                field: "default_spread_bps",
                value: default_spread_bps,
            });
        }
        if impact_bps_per_unit < 0.0 {
            return Err(ConfigError::Negative {
                field: "impact_bps_per_unit",
                value: impact_bps_per_unit,
            });
        }
        if impact_volume <= 0.0 {
            return Err(ConfigError::NonPositive {
                field: "impact_volume",
                value: impact_volume,
            });
        }
        Ok(Self {
            default_spread_bps,
            impact_bps_per_unit,
            impact_volume,
            rng_seed,
            micro,
        })
    }
}

/// An order resting in the per-symbol FIFO, awaiting latency and capacity.
#[derive(Clone, Debug, PartialEq)]
struct PendingOrder {
    order: Order,
    submitted_tick: u64,
    remaining: i64,
    commission_charged: bool,
}

/// The execution microstructure simulator. One instance per backtest run.
pub struct ExecutionSimulator {
    commission_per_trade: f64,
    config: ExecutionConfig,
    rng: StdRng,
    tick_index: HashMap<String, u64>,
    pending: HashMap<String, VecDeque<PendingOrder>>,
}

impl ExecutionSimulator {
    pub fn new(commission_per_trade: f64, config: ExecutionConfig) -> Self {
        Self {
            commission_per_trade,
            rng: StdRng::seed_from_u64(config.rng_seed),
            config,
            tick_index: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Enqueue a new order. `submitted_tick` is the symbol's tick_index at
    /// the moment of submission (before the next `on_market` increments it).
    pub fn submit(&mut self, order: Order) {
        let tick = *self.tick_index.get(&order.symbol).unwrap_or(&0);
        let remaining = order.quantity;
        let symbol = order.symbol.clone();
        self.pending.entry(symbol).or_default().push_back(PendingOrder {
            order,
            submitted_tick: tick,
            remaining,
            commission_charged: false,
        });
    }

    /// Advance this symbol's tick counter and process its FIFO, returning
    /// every `Fill` produced this tick (possibly several, possibly none).
    pub fn on_market(&mut self, tick: &Market) -> Vec<Fill> {
        let current_tick = {
            let counter = self.tick_index.entry(tick.symbol.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        let mut fills = Vec::new();
        let queue = match self.pending.get_mut(&tick.symbol) {
            Some(q) if !q.is_empty() => q,
            _ => return fills,
        };

        let tick_volume = tick.volume.unwrap_or(self.config.micro.default_tick_volume);
        let mut remaining_capacity =
            (tick_volume * self.config.micro.max_participation_rate).max(0.0).floor() as i64;

        let iterations = queue.len();
        for _ in 0..iterations {
            let mut pending = match queue.pop_front() {
                Some(p) => p,
                None => break,
            };

            if current_tick - pending.submitted_tick < self.config.micro.latency_events {
                queue.push_back(pending);
                continue;
            }

            if remaining_capacity <= 0 {
                queue.push_front(pending);
                break;
            }

            if pending.order.order_type == OrderType::Limit {
                let limit_price = match pending.order.limit_price {
                    Some(p) => p,
                    None => continue, // dropped: no limit price, not re-queued
                };
                if !Self::limit_is_touching(pending.order.side, limit_price, tick) {
                    queue.push_back(pending);
                    continue;
                }
                let p_fill = self.config.micro.base_fill_probability
                    * (1.0 - self.config.micro.queue_ahead_fraction);
                let draw: f64 = self.rng.gen();
                if draw > p_fill {
                    queue.push_back(pending);
                    continue;
                }
            }

            let fill_qty = pending.remaining.min(remaining_capacity);
            let commission = if pending.commission_charged {
                0.0
            } else {
                self.commission_per_trade
            };
            let fill = self.build_fill(&pending.order, tick, fill_qty, commission);
            fills.push(fill);

            pending.commission_charged = true;
            pending.remaining -= fill_qty;
            remaining_capacity -= fill_qty;

            if pending.remaining > 0 {
                queue.push_back(pending);
            }
        }

        fills
    }

    fn limit_is_touching(side: Side, limit_price: f64, tick: &Market) -> bool {
        match side {
            Side::Buy => {
                let reference = tick.ask.unwrap_or(tick.mid);
                limit_price >= reference
            }
            Side::Sell => {
                let reference = tick.bid.unwrap_or(tick.mid);
                limit_price <= reference
            }
        }
    }

    fn effective_spread(&self, tick: &Market) -> f64 {
        if let (Some(bid), Some(ask)) = (tick.bid, tick.ask) {
            if ask >= bid {
                return ask - bid;
            }
        }
        let spread_bps = tick.spread_bps.unwrap_or(self.config.default_spread_bps);
        tick.mid * (spread_bps / 10_000.0)
    }

    fn build_fill(&self, order: &Order, tick: &Market, qty: i64, commission: f64) -> Fill {
        let spread = self.effective_spread(tick);
        let half_spread = 0.5 * spread;

        let impact_bps =
            self.config.impact_bps_per_unit * (qty as f64 / self.config.impact_volume.max(1.0));
        let impact = tick.mid * (impact_bps / 10_000.0);

        let side_sign = order.side.sign() as f64;
        let fill_price = tick.mid + side_sign * (half_spread + impact);
        let slippage = fill_price - tick.mid;

        Fill::new(
            tick.timestamp,
            order.symbol.clone(),
            order.side,
            qty,
            fill_price,
            commission,
            slippage,
        )
        .expect("execution simulator only builds well-formed fills")
    }
}
