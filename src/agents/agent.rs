//! Independent analysis agent.
//!
//! One agent per role per symbol. On a fixed interval it gathers its
//! role's exchange inputs, pre-digests them into numbers, asks the model
//! for a structured verdict, and stores the result as its latest report.
//! Nothing that happens in a cycle can crash the loop: every failure
//! becomes a neutral report.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rust_decimal::prelude::ToPrimitive;

use crate::domain::{AgentReport, AgentSignal};
use crate::error::{QuorumError, Result};
use crate::exchange::{AiLogEntry, Candle, ExchangeClient, PositionInfo};
use crate::llm::LlmClient;
use crate::signal::indicators;

use super::role::AgentRole;

const REPORT_CHANNEL_CAPACITY: usize = 64;
const MIN_LLM_TIMEOUT_SECS: u64 = 1;
const CANDLE_GRANULARITY: &str = "1m";
const CANDLE_LIMIT: u32 = 100;
const DEPTH_LEVELS: usize = 10;

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    signal: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn default_confidence() -> f64 {
    0.5
}

/// Candle-bucket VPIN approximation over the trailing `buckets` candles.
/// Each candle's volume is split into buy/sell flow by where it closed
/// within its range; a doji with no range splits evenly.
fn candle_vpin(candles: &[Candle], buckets: usize) -> Option<f64> {
    let take = buckets.min(candles.len());
    if take == 0 {
        return None;
    }
    let rows: Vec<(f64, f64)> = candles[candles.len() - take..]
        .iter()
        .map(|c| {
            let range = c.high - c.low;
            let buy_fraction = if range > 0.0 {
                ((c.close - c.low) / range).clamp(0.0, 1.0)
            } else {
                0.5
            };
            (c.volume * buy_fraction, c.volume * (1.0 - buy_fraction))
        })
        .collect();
    indicators::vpin(&rows)
}

/// Kelly sizing hint from the open book: win probability from the share
/// of positions in profit, payoff ratio from average win vs average loss.
fn position_kelly(positions: &[PositionInfo]) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }
    let mut wins = 0usize;
    let mut win_sum = 0.0;
    let mut loss_sum = 0.0;
    for position in positions {
        let pl = position.unrealized_pl.to_f64().unwrap_or(0.0);
        if pl > 0.0 {
            wins += 1;
            win_sum += pl;
        } else {
            loss_sum += -pl;
        }
    }
    let p = wins as f64 / positions.len() as f64;
    let losses = positions.len() - wins;
    let b = if loss_sum > 0.0 {
        (win_sum / wins.max(1) as f64) / (loss_sum / losses.max(1) as f64)
    } else {
        1.0
    };
    indicators::kelly_fraction(p, b)
}

fn parse_signal(raw: &str) -> AgentSignal {
    match raw.trim().to_ascii_lowercase().as_str() {
        "bullish" | "bull" | "long" => AgentSignal::Bullish,
        "bearish" | "bear" | "short" => AgentSignal::Bearish,
        _ => AgentSignal::Neutral,
    }
}

/// Role-specialized worker querying the model on a fixed interval
pub struct IndependentAgent {
    name: String,
    role: AgentRole,
    symbol: String,
    interval: Duration,
    exchange: Arc<dyn ExchangeClient>,
    llm: Arc<LlmClient>,
    latest: Arc<RwLock<Option<AgentReport>>>,
    report_tx: broadcast::Sender<AgentReport>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl IndependentAgent {
    pub fn new(
        name: impl Into<String>,
        role: AgentRole,
        symbol: impl Into<String>,
        interval: Duration,
        exchange: Arc<dyn ExchangeClient>,
        llm: Arc<LlmClient>,
    ) -> Self {
        let (report_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            name: name.into(),
            role,
            symbol: symbol.into(),
            interval,
            exchange,
            llm,
            latest: Arc::new(RwLock::new(None)),
            report_tx,
            stop_tx,
            stop_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub async fn latest_report(&self) -> Option<AgentReport> {
        self.latest.read().await.clone()
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<AgentReport> {
        self.report_tx.subscribe()
    }

    /// Launch the analysis loop; the first cycle runs immediately
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn run(&self) {
        info!(agent = %self.name, role = %self.role, symbol = %self.symbol, "agent starting");

        let mut stop_rx = self.stop_rx.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Cycles never overlap: the next interval tick is consumed only
        // after the previous cycle has stored its report.
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    *self.latest.write().await = Some(report.clone());
                    let _ = self.report_tx.send(report);
                }
                _ = stop_rx.changed() => {
                    info!(agent = %self.name, "agent stopped");
                    return;
                }
            }
        }
    }

    /// One analysis round; failures degrade to a neutral report
    async fn run_cycle(&self) -> AgentReport {
        match self.analyze().await {
            Ok(report) => report,
            Err(e) => {
                warn!(agent = %self.name, role = %self.role, error = %e, "analysis cycle failed");
                AgentReport::neutral(&self.name, self.role, format!("error: {}", e))
            }
        }
    }

    async fn analyze(&self) -> Result<AgentReport> {
        let digest = self.gather_digest().await?;
        let digest_text = serde_json::to_string_pretty(&digest)?;

        let user_prompt = format!(
            "Symbol: {}\n\nCurrent data:\n{}\n\nRespond with strict JSON:\n\
             {{\"signal\": \"bullish\"|\"bearish\"|\"neutral\", \"confidence\": 0.0-1.0, \
             \"reasoning\": \"one or two sentences\", \"data\": {{}}}}",
            self.symbol, digest_text
        );

        let timeout = self
            .interval
            .checked_sub(Duration::from_secs(2))
            .unwrap_or(Duration::from_secs(MIN_LLM_TIMEOUT_SECS))
            .max(Duration::from_secs(MIN_LLM_TIMEOUT_SECS));

        let value = self
            .llm
            .chat_json(self.role.system_prompt(), &user_prompt, timeout)
            .await?;

        let verdict: RawVerdict = serde_json::from_value(value.clone())
            .map_err(|e| QuorumError::LlmParse(e.to_string()))?;

        let report = AgentReport {
            agent_name: self.name.clone(),
            role: self.role,
            timestamp: chrono::Utc::now(),
            signal: parse_signal(&verdict.signal),
            confidence: verdict.confidence.clamp(0.0, 1.0),
            reasoning: verdict.reasoning,
            payload: verdict.data,
        };

        self.audit(&digest_text, &value);
        Ok(report)
    }

    /// Mirror the round-trip to the venue's AI audit sink, fire-and-forget
    fn audit(&self, input: &str, output: &serde_json::Value) {
        let exchange = Arc::clone(&self.exchange);
        let entry = AiLogEntry {
            stage: format!("agent:{}", self.role),
            model: self.llm.model_name().to_string(),
            input: input.to_string(),
            output: output.to_string(),
            explanation: format!("{} analysis for {}", self.role, self.symbol),
        };
        tokio::spawn(async move {
            if let Err(e) = exchange.upload_ai_log(&entry).await {
                debug!(error = %e, "ai log upload failed");
            }
        });
    }

    /// Gather the role's fixed input set and reduce it to numbers
    async fn gather_digest(&self) -> Result<serde_json::Value> {
        match self.role {
            AgentRole::Technical => {
                let candles = self
                    .exchange
                    .get_candles(&self.symbol, CANDLE_GRANULARITY, CANDLE_LIMIT)
                    .await?;
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
                let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
                let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();

                let macd = indicators::macd(&closes, 12, 26, 9);
                let bands = indicators::bollinger(&closes, 20, 2.0);
                Ok(json!({
                    "close": closes.last(),
                    "rsi14": indicators::rsi(&closes, 14),
                    "ema9": indicators::ema(&closes, 9),
                    "ema21": indicators::ema(&closes, 21),
                    "macd": macd.map(|(line, signal, hist)| json!({
                        "line": line, "signal": signal, "histogram": hist,
                    })),
                    "bollinger": bands.map(|(upper, mid, lower)| json!({
                        "upper": upper, "middle": mid, "lower": lower,
                    })),
                    "atr14": indicators::atr(&highs, &lows, &closes, 14),
                    "vpin20": candle_vpin(&candles, 20),
                }))
            }
            AgentRole::Structure => {
                let depth = self.exchange.get_depth(&self.symbol).await?;
                let funding = self.exchange.get_funding_rate(&self.symbol).await?;
                let positions = self.exchange.get_positions().await?;
                let assets = self.exchange.get_assets().await?;
                Ok(json!({
                    "obi10": depth.obi(DEPTH_LEVELS),
                    "spread_bps": depth.spread_bps(),
                    "funding_rate": funding.funding_rate,
                    "open_positions": positions.len(),
                    "position_symbols": positions.iter().map(|p| p.symbol.clone()).collect::<Vec<_>>(),
                    "equity": assets.iter().map(|a| a.equity.to_string()).collect::<Vec<_>>(),
                }))
            }
            AgentRole::Market => {
                let depth = self.exchange.get_depth(&self.symbol).await?;
                let ticker = self.exchange.get_ticker(&self.symbol).await?;
                Ok(json!({
                    "last": ticker.last_price,
                    "bid": ticker.bid,
                    "ask": ticker.ask,
                    "volume_24h": ticker.volume_24h,
                    "obi10": depth.obi(DEPTH_LEVELS),
                    "spread_bps": depth.spread_bps(),
                }))
            }
            AgentRole::Sentiment => {
                let funding = self.exchange.get_funding_rate(&self.symbol).await?;
                let ticker = self.exchange.get_ticker(&self.symbol).await?;
                Ok(json!({
                    "funding_rate": funding.funding_rate,
                    "next_funding_time": funding.next_funding_time,
                    "change_24h": ticker.change_24h,
                    "last": ticker.last_price,
                }))
            }
            AgentRole::Risk => {
                let assets = self.exchange.get_assets().await?;
                let positions = self.exchange.get_positions().await?;
                Ok(json!({
                    "assets": assets.iter().map(|a| json!({
                        "coin": a.coin_name,
                        "equity": a.equity.to_string(),
                        "available": a.available.to_string(),
                    })).collect::<Vec<_>>(),
                    "positions": positions.iter().map(|p| json!({
                        "symbol": p.symbol,
                        "side": p.hold_side,
                        "size": p.total.to_string(),
                        "unrealized_pl": p.unrealized_pl.to_string(),
                    })).collect::<Vec<_>>(),
                    "kelly_hint": position_kelly(&positions),
                }))
            }
            AgentRole::Momentum => {
                let candles = self
                    .exchange
                    .get_candles(&self.symbol, CANDLE_GRANULARITY, CANDLE_LIMIT)
                    .await?;
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
                Ok(json!({
                    "close": closes.last(),
                    "rsi14": indicators::rsi(&closes, 14),
                    "ema20": indicators::ema(&closes, 20),
                    "ema50": indicators::ema(&closes, 50),
                    "momentum10": indicators::momentum(&closes, 10),
                }))
            }
            AgentRole::Bull | AgentRole::Bear => {
                let ticker = self.exchange.get_ticker(&self.symbol).await?;
                let funding = self.exchange.get_funding_rate(&self.symbol).await?;
                let candles = self
                    .exchange
                    .get_candles(&self.symbol, CANDLE_GRANULARITY, CANDLE_LIMIT)
                    .await?;
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
                Ok(json!({
                    "last": ticker.last_price,
                    "change_24h": ticker.change_24h,
                    "funding_rate": funding.funding_rate,
                    "rsi14": indicators::rsi(&closes, 14),
                    "ema20": indicators::ema(&closes, 20),
                    "momentum10": indicators::momentum(&closes, 10),
                }))
            }
            AgentRole::Fundamentals => {
                let ticker = self.exchange.get_ticker(&self.symbol).await?;
                let funding = self.exchange.get_funding_rate(&self.symbol).await?;
                Ok(json!({
                    "last": ticker.last_price,
                    "change_24h": ticker.change_24h,
                    "funding_rate": funding.funding_rate,
                    "next_funding_time": funding.next_funding_time,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_parsing_accepts_aliases() {
        assert_eq!(parse_signal("bullish"), AgentSignal::Bullish);
        assert_eq!(parse_signal("LONG"), AgentSignal::Bullish);
        assert_eq!(parse_signal("bear"), AgentSignal::Bearish);
        assert_eq!(parse_signal("neutral"), AgentSignal::Neutral);
        assert_eq!(parse_signal("garbage"), AgentSignal::Neutral);
        assert_eq!(parse_signal(""), AgentSignal::Neutral);
    }

    #[test]
    fn verdict_defaults_cover_missing_fields() {
        let verdict: RawVerdict = serde_json::from_str("{}").unwrap();
        assert_eq!(verdict.confidence, 0.5);
        assert_eq!(parse_signal(&verdict.signal), AgentSignal::Neutral);
    }

    #[test]
    fn candle_vpin_splits_volume_by_close_location() {
        let candle = |low: f64, high: f64, close: f64, volume: f64| Candle {
            ts: 0,
            open: low,
            high,
            low,
            close,
            volume,
        };

        // every candle closed at its high: all flow is buy flow
        let up = vec![
            candle(100.0, 101.0, 101.0, 5.0),
            candle(101.0, 102.0, 102.0, 5.0),
        ];
        assert!((candle_vpin(&up, 20).unwrap() - 1.0).abs() < 1e-12);

        // closes at mid-range: buy and sell flow balance in every bucket
        let balanced = vec![
            candle(100.0, 102.0, 101.0, 5.0),
            candle(100.0, 102.0, 101.0, 5.0),
        ];
        assert!(candle_vpin(&balanced, 20).unwrap().abs() < 1e-12);

        // a doji has no range and splits evenly
        let doji = vec![candle(100.0, 100.0, 100.0, 5.0)];
        assert!(candle_vpin(&doji, 20).unwrap().abs() < 1e-12);

        assert!(candle_vpin(&[], 20).is_none());
    }

    #[test]
    fn kelly_hint_from_open_book() {
        use crate::domain::PositionSide;
        use rust_decimal_macros::dec;

        let position = |pl| PositionInfo {
            symbol: "BTCUSDT".into(),
            hold_side: PositionSide::Long,
            total: dec!(0.001),
            average_open_price: dec!(88000),
            unrealized_pl: pl,
        };

        assert_eq!(position_kelly(&[]), 0.0);

        // one winner, one equal loser: p = 0.5, b = 1 -> no edge
        let flat = vec![position(dec!(10)), position(dec!(-10))];
        assert!(position_kelly(&flat).abs() < 1e-12);

        // winners dominate: positive fraction, never above 1
        let good = vec![position(dec!(30)), position(dec!(30)), position(dec!(-10))];
        let hint = position_kelly(&good);
        assert!(hint > 0.0 && hint <= 1.0);
    }

    #[test]
    fn neutral_report_shape() {
        let report = AgentReport::neutral("tech-1", AgentRole::Technical, "error: timeout");
        assert_eq!(report.signal, AgentSignal::Neutral);
        assert_eq!(report.confidence, 0.5);
        assert!(report.reasoning.starts_with("error"));
    }
}
