//! Tick-driven evaluation and dispatch path.
//!
//! One hot loop per symbol, single consumer of that symbol's tick stream.
//! Per tick it fuses the local signal with the decayed advisory, gates on
//! confirmation, cooldown, and the risk engine, and issues at most one
//! market order. Decision logic is clocked by the tick timestamp so the
//! path is deterministic under test; wall-clock drives only the timers.
//!
//! The tick handler performs no model calls and no timer waits; its only
//! network touch is the order placement itself. Position reconciliation
//! and the depth refresh run on a separate slow timer.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, TradingConfig};
use crate::domain::position::{is_close_code, side_code};
use crate::domain::{Advisory, AdvisoryAction, Position, PositionSide, PriceWindow, Tick, TradeDirection};
use crate::error::Result;
use crate::exchange::{DepthSnapshot, ExchangeClient};
use crate::feed::MarketDataFeed;
use crate::signal::combiner::combine;
use crate::signal::indicators::rsi;

use super::risk::RiskEngine;

const AI_BIAS_WEIGHT: f64 = 0.15;
const STRONG_CONFIDENCE: f64 = 0.7;
const RSI_PERIOD: usize = 14;
const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;
const SIZE_PRECISION: u32 = 5;
const STATUS_SAMPLE_RATE: f64 = 0.05;

/// What a tick evaluation dispatched, if anything
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub side_code: u8,
    pub size: Decimal,
}

/// Open/increase sizing: price-scaled equity fraction, capped and rounded
/// to venue precision.
fn order_size(
    equity: Decimal,
    risk_per_trade: Decimal,
    price: f64,
    max_position_size: Decimal,
) -> Decimal {
    assert!(price.is_finite() && price > 0.0, "sizing with invalid price {price}");
    let price = Decimal::try_from(price).unwrap_or(Decimal::ONE);
    (equity * risk_per_trade / price)
        .min(max_position_size)
        .round_dp(SIZE_PRECISION)
}

/// Per-symbol evaluator; not thread-safe by design, exactly one per symbol
pub struct HotLoop {
    symbol: String,
    exchange: Arc<dyn ExchangeClient>,
    advisory_rx: watch::Receiver<Option<Arc<Advisory>>>,
    config_rx: watch::Receiver<Arc<TradingConfig>>,
    risk: RiskEngine,
    prices: PriceWindow,
    depth: DepthSnapshot,
    position: Option<Position>,
    last_order_at: Option<DateTime<Utc>>,
    ticks_seen: u64,
}

impl HotLoop {
    pub fn new(
        symbol: impl Into<String>,
        risk: RiskEngine,
        advisory_rx: watch::Receiver<Option<Arc<Advisory>>>,
        config_rx: watch::Receiver<Arc<TradingConfig>>,
        exchange: Arc<dyn ExchangeClient>,
        window_capacity: usize,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange,
            advisory_rx,
            config_rx,
            risk,
            prices: PriceWindow::new(window_capacity),
            depth: DepthSnapshot::default(),
            position: None,
            last_order_at: None,
            ticks_seen: 0,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn risk(&self) -> &RiskEngine {
        &self.risk
    }

    pub fn risk_mut(&mut self) -> &mut RiskEngine {
        &mut self.risk
    }

    /// Adopt the exchange's view of our position and account, overwriting
    /// any optimistic state. Called at startup and on the slow timer.
    pub async fn reconcile(&mut self) -> Result<()> {
        let positions = self.exchange.get_positions().await?;
        self.position = positions
            .into_iter()
            .find(|p| p.symbol == self.symbol && p.total > Decimal::ZERO)
            .map(|p| Position {
                symbol: p.symbol,
                side: p.hold_side,
                size: p.total,
                entry_price: p.average_open_price,
            });
        let size = self
            .position
            .as_ref()
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO);
        self.risk.set_position_size(size);

        if let Ok(assets) = self.exchange.get_assets().await {
            if let Some(usdt) = assets.iter().find(|a| a.coin_name == "USDT") {
                self.risk.set_equity(usdt.equity);
            }
        }

        debug!(symbol = %self.symbol, position = ?self.position, "reconciled from exchange");
        Ok(())
    }

    /// Refresh the top-of-book snapshot the combiner reads
    pub async fn refresh_depth(&mut self) -> Result<()> {
        self.depth = self.exchange.get_depth(&self.symbol).await?;
        Ok(())
    }

    /// Evaluate one tick; dispatches at most one order.
    pub async fn on_tick(&mut self, tick: &Tick) -> Option<Dispatch> {
        let now = tick.timestamp;
        self.prices.push(tick.last_price);
        self.ticks_seen += 1;

        let config: Arc<TradingConfig> = self.config_rx.borrow().clone();
        let advisory = self.advisory_rx.borrow().clone();

        // Confidence decay: an absent or stale advisory is hold at zero
        let (action, effective) = advisory
            .as_deref()
            .map(|a| a.effective(now, config.decay_window_secs))
            .unwrap_or((AdvisoryAction::Hold, 0.0));
        let bias = advisory
            .as_deref()
            .map(|a| a.bias(now, config.decay_window_secs))
            .unwrap_or(0.0);

        let prices = self.prices.to_vec();
        let local = combine(&prices, &self.depth, &config.weights);
        let fused = local + AI_BIAS_WEIGHT * bias;

        if self.sampled() {
            info!(
                symbol = %self.symbol,
                tick = self.ticks_seen,
                price = tick.last_price,
                signal = fused,
                action = %action,
                confidence = effective,
                position = ?self.position.as_ref().map(|p| (p.side, p.size)),
                "tick"
            );
        }

        let direction = match action {
            AdvisoryAction::Long => TradeDirection::Long,
            AdvisoryAction::Short => TradeDirection::Short,
            AdvisoryAction::Close => TradeDirection::Close,
            AdvisoryAction::Hold => return None,
        };

        // Local confirmation: strong advisory conviction, or the local
        // oscillator not already stretched against the entry
        let local_rsi = rsi(&prices, RSI_PERIOD);
        let confirmed = match direction {
            TradeDirection::Long => {
                effective > STRONG_CONFIDENCE || local_rsi.map_or(true, |r| r < RSI_OVERBOUGHT)
            }
            TradeDirection::Short => {
                effective > STRONG_CONFIDENCE || local_rsi.map_or(true, |r| r > RSI_OVERSOLD)
            }
            TradeDirection::Close => true,
        };

        if let Some(last) = self.last_order_at {
            if now - last < ChronoDuration::seconds(config.cooldown_secs as i64) {
                return None;
            }
        }

        if !(effective >= config.min_confidence && confirmed && fused.abs() >= config.signal_threshold)
        {
            return None;
        }

        let code = side_code(direction, self.position.as_ref().map(|p| p.side))?;

        let size = if is_close_code(code) {
            self.position.as_ref().map(|p| p.size)?
        } else {
            order_size(
                self.risk.equity(),
                config.risk_per_trade,
                tick.last_price,
                config.max_position_size,
            )
        };
        if size <= Decimal::ZERO {
            return None;
        }

        if !self.risk.can_trade(code, size, tick.last_price) {
            debug!(symbol = %self.symbol, code, %size, "risk engine rejected order");
            return None;
        }

        match self.exchange.place_order(&self.symbol, code, size).await {
            Ok(ack) => {
                info!(
                    symbol = %self.symbol,
                    order_id = %ack.order_id,
                    code,
                    %size,
                    price = tick.last_price,
                    "order placed"
                );
                self.apply_fill(code, size, tick.last_price);
                self.last_order_at = Some(now);
                Some(Dispatch {
                    side_code: code,
                    size,
                })
            }
            Err(e) => {
                // failed submissions do not trip the breaker
                warn!(symbol = %self.symbol, error = %e, "order placement failed");
                None
            }
        }
    }

    /// Optimistic position update after a successful market order;
    /// reconciliation overwrites this with the exchange's truth.
    fn apply_fill(&mut self, code: u8, size: Decimal, price: f64) {
        let entry_price = Decimal::try_from(price).unwrap_or(Decimal::ZERO);
        match code {
            1 => {
                self.position = Some(Position {
                    symbol: self.symbol.clone(),
                    side: PositionSide::Long,
                    size,
                    entry_price,
                });
            }
            3 => {
                self.position = Some(Position {
                    symbol: self.symbol.clone(),
                    side: PositionSide::Short,
                    size,
                    entry_price,
                });
            }
            2 | 4 => {
                self.position = match self.position.take() {
                    Some(mut p) if p.size > size => {
                        p.size -= size;
                        Some(p)
                    }
                    _ => None,
                };
            }
            _ => unreachable!("side codes are produced by the declarative table"),
        }
        let held = self
            .position
            .as_ref()
            .map(|p| p.size)
            .unwrap_or(Decimal::ZERO);
        self.risk.set_position_size(held);
    }

    fn sampled(&self) -> bool {
        rand::random::<f64>() < STATUS_SAMPLE_RATE
    }

    /// Drive the loop from the feed until stop. The slow timer handles
    /// startup reconciliation, periodic depth refresh, and the REST
    /// fallback when the feed has gone quiet.
    pub async fn run(
        mut self,
        feed: Arc<MarketDataFeed>,
        engine_config: EngineConfig,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        info!(symbol = %self.symbol, "hot loop starting");

        let mut ticks = feed.subscribe();
        let mut slow = tokio::time::interval(Duration::from_secs(engine_config.reconcile_secs));
        slow.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = ticks.recv() => {
                    match result {
                        Ok(tick) => {
                            let _ = self.on_tick(&tick).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(symbol = %self.symbol, lagged = n, "tick stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            // feed gone; the slow timer's REST fallback
                            // keeps us alive, avoid a hot spin here
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = slow.tick() => {
                    if let Err(e) = self.reconcile().await {
                        warn!(symbol = %self.symbol, error = %e, "reconciliation failed");
                    }
                    if let Err(e) = self.refresh_depth().await {
                        warn!(symbol = %self.symbol, error = %e, "depth refresh failed");
                    }
                    self.poll_when_stale(&feed, engine_config.stale_after_secs).await;
                }
                _ = stop_rx.changed() => {
                    info!(symbol = %self.symbol, "hot loop stopped");
                    return;
                }
            }
        }
    }

    /// Degraded-feed fallback: fetch a single REST ticker and evaluate it
    async fn poll_when_stale(&mut self, feed: &MarketDataFeed, stale_after_secs: u64) {
        let stale = match feed.latest().await {
            Some(tick) => {
                Utc::now() - tick.timestamp > ChronoDuration::seconds(stale_after_secs as i64)
            }
            None => true,
        };
        if !stale {
            return;
        }

        match self.exchange.get_ticker(&self.symbol).await {
            Ok(ticker) if ticker.last_price > 0.0 => {
                let tick = Tick::new(
                    self.symbol.clone(),
                    ticker.last_price,
                    ticker.bid.unwrap_or(0.0),
                    ticker.ask.unwrap_or(0.0),
                    ticker.volume_24h.unwrap_or(0.0),
                    Utc::now(),
                );
                debug!(symbol = %self.symbol, price = tick.last_price, "REST tick fallback");
                let _ = self.on_tick(&tick).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "REST ticker fallback failed");
            }
        }
    }
}
