//! Moving-average crossover strategy.
//!
//! `on_market` is O(1) amortized per tick: a fixed-capacity ring buffer per
//! window plus a running sum, so neither allocates nor rescans history.
//! At most one `Signal` per tick, never two consecutive signals of the same
//! side for a symbol (`last_signal` enforces this).

use std::collections::HashMap;
use std::fmt;

use qbt_types::{Market, Side, Signal};

/// Construction-time validation error for [`MaCrossConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    EmptySymbols,
    BlankSymbol,
    NonPositiveWindow { field: &'static str, value: i64 },
    ShortNotLessThanLong { short: i64, long: i64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptySymbols => write!(f, "symbols must not be empty"),
            ConfigError::BlankSymbol => write!(f, "symbols must not contain blank values"),
            ConfigError::NonPositiveWindow { field, value } => {
                write!(f, "{field} must be > 0, got {value}")
            }
            ConfigError::ShortNotLessThanLong { short, long } => write!(
                f,
                "short_window must be < long_window, got {short} and {long}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Validated MA-cross configuration: an ordered symbol set and two windows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaCrossConfig {
    pub symbols: Vec<String>,
    pub short_window: usize,
    pub long_window: usize,
}

impl MaCrossConfig {
    pub fn new(
        symbols: Vec<String>,
        short_window: usize,
        long_window: usize,
    ) -> Result<Self, ConfigError> {
        if symbols.is_empty() {
            return Err(ConfigError::EmptySymbols);
        }
        if symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::BlankSymbol);
        }
        if short_window == 0 {
            return Err(ConfigError::NonPositiveWindow {
                field: "short_window",
                value: 0,
            });
        }
        if long_window == 0 {
            return Err(ConfigError::NonPositiveWindow {
                field: "long_window",
                value: 0,
            });
        }
        if short_window >= long_window {
            return Err(ConfigError::ShortNotLessThanLong {
                short: short_window as i64,
                long: long_window as i64,
            });
        }
        Ok(Self {
            symbols,
            short_window,
            long_window,
        })
    }
}

/// Fixed-capacity ring buffer over `f64` with an O(1)-maintained running sum.
#[derive(Clone, Debug, PartialEq)]
struct RingBuffer {
    capacity: usize,
    buf: Vec<f64>,
    start: usize,
    len: usize,
    sum: f64,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            capacity,
            buf: vec![0.0; capacity],
            start: 0,
            len: 0,
            sum: 0.0,
        }
    }

    fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Push a value, evicting the oldest when full. Running sum reflects the
    /// contents after the push.
    fn push(&mut self, value: f64) {
        if self.is_full() {
            self.sum -= self.buf[self.start];
            self.buf[self.start] = value;
            self.start = (self.start + 1) % self.capacity;
        } else {
            let idx = (self.start + self.len) % self.capacity;
            self.buf[idx] = value;
            self.len += 1;
        }
        self.sum += value;
    }

    fn mean(&self) -> f64 {
        self.sum / self.capacity as f64
    }
}

/// Per-symbol strategy state: short and long windows plus the last side
/// emitted for that symbol (so the same side never fires twice in a row).
#[derive(Clone, Debug, PartialEq)]
struct SymbolState {
    short: RingBuffer,
    long: RingBuffer,
    last_signal: Option<Side>,
}

impl SymbolState {
    fn new(short_window: usize, long_window: usize) -> Self {
        Self {
            short: RingBuffer::new(short_window),
            long: RingBuffer::new(long_window),
            last_signal: None,
        }
    }
}

/// Capability all strategies implement: consume a `Market`, emit at most one
/// `Signal`. Swappable at compile time, no runtime polymorphism required.
pub trait Strategy {
    fn on_market(&mut self, tick: &Market) -> Option<Signal>;
}

/// Moving-average crossover strategy over a fixed symbol set.
pub struct MaCrossStrategy {
    config: MaCrossConfig,
    state: HashMap<String, SymbolState>,
}

impl MaCrossStrategy {
    pub fn new(config: MaCrossConfig) -> Self {
        let mut state = HashMap::with_capacity(config.symbols.len());
        for sym in &config.symbols {
            state.insert(
                sym.clone(),
                SymbolState::new(config.short_window, config.long_window),
            );
        }
        Self { config, state }
    }

    pub fn config(&self) -> &MaCrossConfig {
        &self.config
    }
}

impl Strategy for MaCrossStrategy {
    /// Ignores ticks for symbols outside the configured set. Warm-up ticks
    /// (fewer than `long_window` samples seen) never emit. Exact equality of
    /// the two moving averages emits nothing.
    fn on_market(&mut self, tick: &Market) -> Option<Signal> {
        let st = self.state.get_mut(&tick.symbol)?;

        st.short.push(tick.mid);
        st.long.push(tick.mid);

        if !st.long.is_full() {
            return None;
        }

        let short_ma = st.short.mean();
        let long_ma = st.long.mean();

        if short_ma > long_ma && st.last_signal != Some(Side::Buy) {
            st.last_signal = Some(Side::Buy);
            Some(Signal::new(tick.timestamp, tick.symbol.clone(), Side::Buy))
        } else if short_ma < long_ma && st.last_signal != Some(Side::Sell) {
            st.last_signal = Some(Side::Sell);
            Some(Signal::new(tick.timestamp, tick.symbol.clone(), Side::Sell))
        } else {
            None
        }
    }
}
