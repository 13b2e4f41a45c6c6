//! End-to-end decision-path scenarios against a mock exchange.
//!
//! These drive `HotLoop::on_tick` directly with canned advisories and
//! depth, asserting on the orders the mock records.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use quorum::config::{RiskLimits, TradingConfig};
use quorum::domain::{Advisory, AdvisoryAction, PositionSide, Tick};
use quorum::engine::{HotLoop, RiskEngine, RiskUpdate};
use quorum::error::{QuorumError, Result};
use quorum::exchange::{
    AiLogAck, AiLogEntry, AssetBalance, Candle, DepthSnapshot, ExchangeClient, FundingRate,
    OrderAck, OrderRecord, PositionInfo, Ticker,
};

#[derive(Default)]
struct MockExchange {
    depth: Mutex<DepthSnapshot>,
    positions: Mutex<Vec<PositionInfo>>,
    orders: Mutex<Vec<(String, u8, Decimal)>>,
    fail_orders: Mutex<bool>,
}

impl MockExchange {
    fn set_depth(&self, depth: DepthSnapshot) {
        *self.depth.lock().unwrap() = depth;
    }

    fn set_positions(&self, positions: Vec<PositionInfo>) {
        *self.positions.lock().unwrap() = positions;
    }

    fn fail_orders(&self) {
        *self.fail_orders.lock().unwrap() = true;
    }

    fn orders(&self) -> Vec<(String, u8, Decimal)> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: 88_000.0,
            bid: Some(87_999.0),
            ask: Some(88_001.0),
            volume_24h: Some(100.0),
            change_24h: Some(0.01),
        })
    }

    async fn get_depth(&self, _symbol: &str) -> Result<DepthSnapshot> {
        Ok(self.depth.lock().unwrap().clone())
    }

    async fn get_candles(&self, _: &str, _: &str, _: u32) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn get_funding_rate(&self, _: &str) -> Result<FundingRate> {
        Ok(FundingRate {
            funding_rate: 0.0001,
            next_funding_time: None,
        })
    }

    async fn get_assets(&self) -> Result<Vec<AssetBalance>> {
        Ok(Vec::new())
    }

    async fn get_positions(&self) -> Result<Vec<PositionInfo>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_order_history(&self, _: &str) -> Result<Vec<OrderRecord>> {
        Ok(Vec::new())
    }

    async fn place_order(&self, symbol: &str, side_code: u8, size: Decimal) -> Result<OrderAck> {
        if *self.fail_orders.lock().unwrap() {
            return Err(QuorumError::OrderSubmission("simulated rejection".into()));
        }
        self.orders
            .lock()
            .unwrap()
            .push((symbol.to_string(), side_code, size));
        Ok(OrderAck {
            order_id: format!("mock-{}", self.orders.lock().unwrap().len()),
            client_oid: None,
        })
    }

    async fn upload_ai_log(&self, _: &AiLogEntry) -> Result<AiLogAck> {
        Ok(AiLogAck {
            code: "00000".into(),
            msg: String::new(),
            data: None,
        })
    }
}

fn bid_heavy_depth() -> DepthSnapshot {
    // top-10 bids sum 100, asks sum 50: OBI = +1/3
    DepthSnapshot {
        bids: (0..10).map(|i| (87_999.0 - i as f64, 10.0)).collect(),
        asks: (0..10).map(|i| (88_001.0 + i as f64, 5.0)).collect(),
    }
}

fn ask_heavy_depth() -> DepthSnapshot {
    DepthSnapshot {
        bids: (0..10).map(|i| (86_999.0 - i as f64, 5.0)).collect(),
        asks: (0..10).map(|i| (87_001.0 + i as f64, 10.0)).collect(),
    }
}

fn limits() -> RiskLimits {
    RiskLimits {
        max_daily_loss: dec!(50),
        min_equity: dec!(100),
        max_drawdown: dec!(0.05),
        max_position_size: dec!(0.05),
        max_open_orders: 5,
    }
}

struct Harness {
    hot_loop: HotLoop,
    advisory_tx: watch::Sender<Option<Arc<Advisory>>>,
    #[allow(dead_code)]
    config_tx: watch::Sender<Arc<TradingConfig>>,
    exchange: Arc<MockExchange>,
}

fn harness(equity: Decimal, config: TradingConfig) -> Harness {
    let exchange = Arc::new(MockExchange::default());
    let (advisory_tx, advisory_rx) = watch::channel(None);
    let (config_tx, config_rx) = watch::channel(Arc::new(config));
    let risk = RiskEngine::new(equity, limits());
    let hot_loop = HotLoop::new(
        "BTCUSDT",
        risk,
        advisory_rx,
        config_rx,
        exchange.clone() as Arc<dyn ExchangeClient>,
        100,
    );
    Harness {
        hot_loop,
        advisory_tx,
        config_tx,
        exchange,
    }
}

fn advisory(action: AdvisoryAction, confidence: f64) -> Advisory {
    Advisory {
        action,
        confidence,
        ..Advisory::hold("scenario")
    }
}

fn tick(price: f64, at: chrono::DateTime<Utc>) -> Tick {
    Tick::new("BTCUSDT", price, 0.0, 0.0, 10.0, at)
}

/// Feed a linear price ramp with no advisory set (no orders can fire)
async fn warm_prices(h: &mut Harness, from: f64, to: f64, n: usize, at: chrono::DateTime<Utc>) {
    for i in 0..n {
        let price = from + (to - from) * i as f64 / (n - 1) as f64;
        let dispatched = h.hot_loop.on_tick(&tick(price, at)).await;
        assert!(dispatched.is_none(), "warmup tick must not trade");
    }
}

#[tokio::test]
async fn bullish_consensus_opens_long() {
    let mut h = harness(dec!(1000), TradingConfig::default());
    h.exchange.set_depth(bid_heavy_depth());
    h.hot_loop.refresh_depth().await.unwrap();

    let now = Utc::now();
    warm_prices(&mut h, 87_000.0, 88_000.0 - 1000.0 / 49.0, 49, now).await;

    h.advisory_tx
        .send(Some(Arc::new(advisory(AdvisoryAction::Long, 0.8))))
        .unwrap();

    let dispatched = h.hot_loop.on_tick(&tick(88_000.0, now)).await;
    let dispatched = dispatched.expect("bullish consensus should place an order");
    assert_eq!(dispatched.side_code, 1);

    // size = min(1000 * 0.02 / 88000, 0.05) at 5 decimals
    let expected = dec!(0.00023);
    assert!((dispatched.size - expected).abs() < dec!(0.000001));

    let position = h.hot_loop.position().expect("optimistic position adopted");
    assert_eq!(position.side, PositionSide::Long);
    assert_eq!(position.size, dispatched.size);

    let orders = h.exchange.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].1, 1);
}

#[tokio::test]
async fn stale_advisory_is_dead() {
    let mut h = harness(dec!(1000), TradingConfig::default());
    h.exchange.set_depth(bid_heavy_depth());
    h.hot_loop.refresh_depth().await.unwrap();

    let now = Utc::now();
    warm_prices(&mut h, 87_000.0, 88_000.0 - 1000.0 / 49.0, 49, now).await;

    // identical to the bullish scenario, except generated 120 s ago with
    // a 60 s decay window
    let mut stale = advisory(AdvisoryAction::Long, 0.8);
    stale.generated_at = now - Duration::seconds(120);
    h.advisory_tx.send(Some(Arc::new(stale))).unwrap();

    let dispatched = h.hot_loop.on_tick(&tick(88_000.0, now)).await;
    assert!(dispatched.is_none(), "stale advisory must not trade");
    assert!(h.exchange.orders().is_empty());
}

#[tokio::test]
async fn breaker_trips_on_drawdown_and_reset_rearms() {
    let mut engine = RiskEngine::new(dec!(1000), limits());
    engine.update_state(RiskUpdate {
        equity: Some(dec!(940)),
        ..Default::default()
    });

    assert!(!engine.can_trade(1, dec!(0.001), 88_000.0));
    let status = engine.status();
    assert!(status.tripped);
    assert!(status
        .trip_reason
        .as_deref()
        .unwrap()
        .contains("drawdown"));

    engine.reset();
    assert!(engine.can_trade(1, dec!(0.001), 88_000.0));
    assert!(!engine.status().tripped);
}

#[tokio::test]
async fn opposing_advisory_closes_then_reverses() {
    let mut h = harness(dec!(1000), TradingConfig::default());
    h.exchange.set_depth(ask_heavy_depth());
    h.hot_loop.refresh_depth().await.unwrap();

    // open long 0.001 adopted from the exchange
    h.exchange.set_positions(vec![PositionInfo {
        symbol: "BTCUSDT".into(),
        hold_side: PositionSide::Long,
        total: dec!(0.001),
        average_open_price: dec!(87500),
        unrealized_pl: Decimal::ZERO,
    }]);
    h.hot_loop.reconcile().await.unwrap();
    assert_eq!(h.hot_loop.position().unwrap().side, PositionSide::Long);

    let now = Utc::now();
    warm_prices(&mut h, 88_000.0, 87_000.0 + 1000.0 / 49.0, 49, now).await;

    h.advisory_tx
        .send(Some(Arc::new(advisory(AdvisoryAction::Short, 0.9))))
        .unwrap();

    // first qualifying tick closes the long (side 4, position size)
    let first = h.hot_loop.on_tick(&tick(87_000.0, now)).await;
    let first = first.expect("reversal should close the long first");
    assert_eq!(first.side_code, 4);
    assert_eq!(first.size, dec!(0.001));
    assert!(h.hot_loop.position().is_none());

    // next qualifying tick after cooldown opens the short
    let later = now + Duration::seconds(6);
    let second = h.hot_loop.on_tick(&tick(87_000.0, later)).await;
    let second = second.expect("flat book should open short after cooldown");
    assert_eq!(second.side_code, 3);
    assert_eq!(h.hot_loop.position().unwrap().side, PositionSide::Short);

    let codes: Vec<u8> = h.exchange.orders().iter().map(|o| o.1).collect();
    assert_eq!(codes, vec![4, 3]);
}

#[tokio::test]
async fn hold_advisory_never_trades() {
    // the coordinator's fusion forces hold when fewer than two agents
    // agree and nobody is strongly confident; the loop must then idle
    let mut h = harness(dec!(1000), TradingConfig::default());
    h.exchange.set_depth(bid_heavy_depth());
    h.hot_loop.refresh_depth().await.unwrap();

    let now = Utc::now();
    warm_prices(&mut h, 87_000.0, 88_000.0 - 1000.0 / 49.0, 49, now).await;

    h.advisory_tx
        .send(Some(Arc::new(advisory(AdvisoryAction::Hold, 0.5))))
        .unwrap();

    let dispatched = h.hot_loop.on_tick(&tick(88_000.0, now)).await;
    assert!(dispatched.is_none());
    assert!(h.exchange.orders().is_empty());
}

#[tokio::test]
async fn cooldown_suppresses_rapid_fire() {
    let mut h = harness(dec!(1000), TradingConfig::default());
    h.exchange.set_depth(bid_heavy_depth());
    h.hot_loop.refresh_depth().await.unwrap();

    let now = Utc::now();
    warm_prices(&mut h, 87_000.0, 88_000.0 - 1000.0 / 49.0, 49, now).await;

    h.advisory_tx
        .send(Some(Arc::new(advisory(AdvisoryAction::Long, 0.8))))
        .unwrap();

    let first = h.hot_loop.on_tick(&tick(88_000.0, now)).await;
    assert!(first.is_some());

    // 3 s later with a 5 s cooldown: suppressed before any other gate
    let second = h.hot_loop.on_tick(&tick(88_010.0, now + Duration::seconds(3))).await;
    assert!(second.is_none());
    assert_eq!(h.exchange.orders().len(), 1);

    // 6 s later the cooldown has passed, but the position is already
    // long and the direction unchanged, so nothing further happens
    let third = h.hot_loop.on_tick(&tick(88_020.0, now + Duration::seconds(6))).await;
    assert!(third.is_none());
    assert_eq!(h.exchange.orders().len(), 1);
}

#[tokio::test]
async fn failed_submission_does_not_trip_or_cool_down() {
    let mut h = harness(dec!(1000), TradingConfig::default());
    h.exchange.set_depth(bid_heavy_depth());
    h.hot_loop.refresh_depth().await.unwrap();
    h.exchange.fail_orders();

    let now = Utc::now();
    warm_prices(&mut h, 87_000.0, 88_000.0 - 1000.0 / 49.0, 49, now).await;

    h.advisory_tx
        .send(Some(Arc::new(advisory(AdvisoryAction::Long, 0.8))))
        .unwrap();

    let dispatched = h.hot_loop.on_tick(&tick(88_000.0, now)).await;
    assert!(dispatched.is_none());
    assert!(h.hot_loop.position().is_none());
    assert!(!h.hot_loop.risk().is_tripped());
    assert!(h.exchange.orders().is_empty());
}

#[tokio::test]
async fn boundary_equalities_trigger() {
    // confidence exactly at min_confidence and |signal| exactly at the
    // threshold both trigger: the contract is >=, not >
    let prices: Vec<f64> = (0..50)
        .map(|i| 87_000.0 + 1000.0 * i as f64 / 49.0)
        .collect();
    let local = quorum::signal::combine(
        &prices,
        &bid_heavy_depth(),
        &quorum::config::SignalWeights::default(),
    );
    let fused = local + 0.15 * 0.8;

    let mut config = TradingConfig::default();
    config.min_confidence = 0.8;
    config.signal_threshold = fused;
    let mut h = harness(dec!(1000), config);
    h.exchange.set_depth(bid_heavy_depth());
    h.hot_loop.refresh_depth().await.unwrap();

    // feed the exact slice the reference signal was computed from, so
    // the evaluated |signal| equals the threshold bit-for-bit
    let now = Utc::now();
    for price in &prices[..49] {
        assert!(h.hot_loop.on_tick(&tick(*price, now)).await.is_none());
    }

    h.advisory_tx
        .send(Some(Arc::new(advisory(AdvisoryAction::Long, 0.8))))
        .unwrap();

    let dispatched = h.hot_loop.on_tick(&tick(prices[49], now)).await;
    assert!(
        dispatched.is_some(),
        "equality at both boundaries must trigger"
    );
}
