use chrono::Utc;
use qbt_execution::{ExecutionConfig, ExecutionSimulator, MicrostructureConfig};
use qbt_types::{Market, Order, Side};

fn tick(symbol: &str, mid: f64, volume: f64) -> Market {
    Market::new(Utc::now(), symbol, mid, Some(mid - 0.5), Some(mid + 0.5), None, Some(volume)).unwrap()
}

#[test]
fn market_order_fills_immediately_at_next_tick_with_spread_slippage() {
    let micro = MicrostructureConfig::new(0, 1_000.0, 1.0, 0.0, 1.0).unwrap();
    let config = ExecutionConfig::new(10.0, 0.0, 1_000.0, 42, micro).unwrap();
    let mut sim = ExecutionSimulator::new(1.0, config);

    let order = Order::market(Utc::now(), "AAPL", Side::Buy, 100).unwrap();
    sim.submit(order);

    let fills = sim.on_market(&tick("AAPL", 100.0, 5_000.0));
    assert_eq!(fills.len(), 1);
    let fill = &fills[0];
    assert_eq!(fill.quantity, 100);
    assert_eq!(fill.commission, 1.0);
    // BUY pays half the bid/ask spread above mid (bid/ask present, so the
    // default_spread_bps fallback is not used).
    assert!(fill.fill_price > 100.0);
}

#[test]
fn order_is_latency_gated_until_enough_ticks_have_elapsed() {
    let micro = MicrostructureConfig::new(2, 1_000.0, 1.0, 0.0, 1.0).unwrap();
    let config = ExecutionConfig::new(0.0, 0.0, 1_000.0, 7, micro).unwrap();
    let mut sim = ExecutionSimulator::new(0.0, config);

    sim.submit(Order::market(Utc::now(), "AAPL", Side::Buy, 10).unwrap());

    // submitted_tick = 0; needs current_tick - submitted_tick >= latency_events (2).
    assert!(sim.on_market(&tick("AAPL", 100.0, 1_000.0)).is_empty()); // current_tick = 1
    let fills = sim.on_market(&tick("AAPL", 100.0, 1_000.0)); // current_tick = 2
    assert_eq!(fills.len(), 1);
}

#[test]
fn large_order_splits_across_ticks_by_participation_cap() {
    let micro = MicrostructureConfig::new(0, 1_000.0, 0.1, 0.0, 1.0).unwrap();
    let config = ExecutionConfig::new(0.0, 0.0, 1_000.0, 1, micro).unwrap();
    let mut sim = ExecutionSimulator::new(2.0, config);

    sim.submit(Order::market(Utc::now(), "AAPL", Side::Buy, 150).unwrap());

    // Capacity per tick = floor(1000 * 0.1) = 100.
    let first = sim.on_market(&tick("AAPL", 100.0, 1_000.0));
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].quantity, 100);
    assert_eq!(first[0].commission, 2.0);

    let second = sim.on_market(&tick("AAPL", 100.0, 1_000.0));
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].quantity, 50);
    assert_eq!(second[0].commission, 0.0, "commission charged only once per order");
}
