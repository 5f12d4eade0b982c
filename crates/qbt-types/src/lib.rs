//! Immutable value types shared by every core component: `Market`, `Signal`,
//! `Order`, `Fill`, plus the `Side` enum they're all built from.
//!
//! No behavior beyond construction-time validation and the `sign()` helper
//! on `Side` — these are data, not actors.

use std::fmt;

use chrono::{DateTime, Utc};

/// BUY or SELL.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for BUY, -1 for SELL.
    pub fn sign(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// MARKET or LIMIT.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OrderType {
    Market,
    Limit,
}

/// Errors raised at construction time by the value types in this crate.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeError {
    EmptySymbol,
    NonFinite { field: &'static str, value: f64 },
    NonPositive { field: &'static str, value: f64 },
    Negative { field: &'static str, value: f64 },
    AskBelowBid { bid: f64, ask: f64 },
    NonPositiveQty { qty: i64 },
    MissingLimitPrice,
    UnexpectedLimitPrice,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::EmptySymbol => write!(f, "symbol must not be empty"),
            TypeError::NonFinite { field, value } => {
                write!(f, "{field} must be finite, got {value}")
            }
            TypeError::NonPositive { field, value } => {
                write!(f, "{field} must be > 0, got {value}")
            }
            TypeError::Negative { field, value } => {
                write!(f, "{field} must be >= 0, got {value}")
            }
            TypeError::AskBelowBid { bid, ask } => {
                write!(f, "ask ({ask}) must be >= bid ({bid})")
            }
            TypeError::NonPositiveQty { qty } => write!(f, "quantity must be > 0, got {qty}"),
            TypeError::MissingLimitPrice => {
                write!(f, "limit_price is required for LIMIT orders")
            }
            TypeError::UnexpectedLimitPrice => {
                write!(f, "limit_price must be absent for MARKET orders")
            }
        }
    }
}

impl std::error::Error for TypeError {}

/// A single validated market tick for one symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct Market {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub mid: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub spread_bps: Option<f64>,
    pub volume: Option<f64>,
}

impl Market {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        mid: f64,
        bid: Option<f64>,
        ask: Option<f64>,
        spread_bps: Option<f64>,
        volume: Option<f64>,
    ) -> Result<Self, TypeError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(TypeError::EmptySymbol);
        }
        if !mid.is_finite() {
            return Err(TypeError::NonFinite { field: "mid", value: mid });
        }
        if mid <= 0.0 {
            return Err(TypeError::NonPositive { field: "mid", value: mid });
        }
        if let Some(b) = bid {
            if !b.is_finite() {
                return Err(TypeError::NonFinite { field: "bid", value: b });
            }
            if b <= 0.0 {
                return Err(TypeError::NonPositive { field: "bid", value: b });
            }
        }
        if let Some(a) = ask {
            if !a.is_finite() {
                return Err(TypeError::NonFinite { field: "ask", value: a });
            }
            if a <= 0.0 {
                return Err(TypeError::NonPositive { field: "ask", value: a });
            }
        }
        if let (Some(b), Some(a)) = (bid, ask) {
            if a < b {
                return Err(TypeError::AskBelowBid { bid: b, ask: a });
            }
        }
        if let Some(s) = spread_bps {
            if !s.is_finite() {
                return Err(TypeError::NonFinite {
                    field: "spread_bps",
                    value: s,
                });
            }
            if s < 0.0 {
                return Err(TypeError::Negative {
                    field: "spread_bps",
                    value: s,
                });
            }
        }
        if let Some(v) = volume {
            if !v.is_finite() {
                return Err(TypeError::NonFinite {
                    field: "volume",
                    value: v,
                });
            }
            if v < 0.0 {
                return Err(TypeError::Negative {
                    field: "volume",
                    value: v,
                });
            }
        }
        Ok(Self {
            timestamp,
            symbol,
            mid,
            bid,
            ask,
            spread_bps,
            volume,
        })
    }
}

/// A strategy-emitted trading signal: buy or sell one symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
}

impl Signal {
    pub fn new(timestamp: DateTime<Utc>, symbol: impl Into<String>, side: Side) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            side,
        }
    }
}

/// An order submitted to the execution simulator.
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
}

impl Order {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        side: Side,
        quantity: i64,
        order_type: OrderType,
        limit_price: Option<f64>,
    ) -> Result<Self, TypeError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(TypeError::EmptySymbol);
        }
        if quantity <= 0 {
            return Err(TypeError::NonPositiveQty { qty: quantity });
        }
        match (order_type, limit_price) {
            (OrderType::Limit, None) => return Err(TypeError::MissingLimitPrice),
            (OrderType::Market, Some(_)) => return Err(TypeError::UnexpectedLimitPrice),
            _ => {}
        }
        Ok(Self {
            timestamp,
            symbol,
            side,
            quantity,
            order_type,
            limit_price,
        })
    }

    pub fn market(timestamp: DateTime<Utc>, symbol: impl Into<String>, side: Side, quantity: i64) -> Result<Self, TypeError> {
        Self::new(timestamp, symbol, side, quantity, OrderType::Market, None)
    }
}

/// An executed fill — the accounting atom consumed by the portfolio.
#[derive(Clone, Debug, PartialEq)]
pub struct Fill {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub fill_price: f64,
    pub commission: f64,
    /// Signed: positive = unfavorable vs mid for BUY, negative = unfavorable vs mid for SELL.
    pub slippage: f64,
}

impl Fill {
    pub fn new(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        side: Side,
        quantity: i64,
        fill_price: f64,
        commission: f64,
        slippage: f64,
    ) -> Result<Self, TypeError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(TypeError::EmptySymbol);
        }
        if quantity <= 0 {
            return Err(TypeError::NonPositiveQty { qty: quantity });
        }
        if !fill_price.is_finite() || fill_price <= 0.0 {
            return Err(TypeError::NonPositive {
                field: "fill_price",
                value: fill_price,
            });
        }
        if commission < 0.0 {
            return Err(TypeError::Negative {
                field: "commission",
                value: commission,
            });
        }
        Ok(Self {
            timestamp,
            symbol,
            side,
            quantity,
            fill_price,
            commission,
            slippage,
        })
    }

    /// Signed quantity: +qty for BUY, -qty for SELL.
    pub fn signed_qty(&self) -> i64 {
        self.side.sign() * self.quantity
    }
}
