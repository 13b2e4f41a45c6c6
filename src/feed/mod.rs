//! Live market-data feed over the venue's public WebSocket.
//!
//! One connection per symbol. Emits a `Tick` for every push frame whose
//! price differs from the cached value; duplicate-price frames are
//! suppressed and parse failures dropped. Reconnects with exponential
//! backoff and latches `Degraded` after too many consecutive failures.

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::domain::Tick;
use crate::error::{QuorumError, Result};

const KEEPALIVE_SECS: u64 = 20;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 30;
const MAX_CONSECUTIVE_FAILURES: u32 = 6;
const CHANNEL_CAPACITY: usize = 1024;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Link state published to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Live,
    /// Too many consecutive failures; the feed has stopped emitting and
    /// consumers must fall back to REST.
    Degraded,
}

#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    arg: Option<PushArg>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PushArg {
    channel: String,
    #[serde(rename = "instId", default)]
    inst_id: String,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    last: String,
    #[serde(rename = "bidPx", default)]
    bid_px: Option<String>,
    #[serde(rename = "askPx", default)]
    ask_px: Option<String>,
    #[serde(rename = "vol24h", default)]
    vol_24h: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

/// Exponential backoff: 2 s initial, doubling per attempt, capped at 30 s
fn backoff_delay(attempt: u32) -> Duration {
    let secs = INITIAL_BACKOFF_SECS
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(10))
        .min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs)
}

fn frame_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|v| v.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// Parse one push frame into a candidate tick.
///
/// Only `ticker` and `candle1m` channels for the subscribed symbol are
/// considered; anything else (subscribe acks, other symbols, junk) is None.
fn parse_frame(text: &str, symbol: &str) -> Option<Tick> {
    let frame: PushFrame = serde_json::from_str(text).ok()?;
    if frame.action.as_deref() != Some("push") {
        return None;
    }
    let arg = frame.arg?;
    if arg.inst_id != symbol {
        return None;
    }
    let data = frame.data?;
    let rows = data.as_array()?;
    let row = rows.last()?;

    match arg.channel.as_str() {
        "ticker" => {
            let ticker: TickerData = serde_json::from_value(row.clone()).ok()?;
            let last = ticker.last.parse::<f64>().ok()?;
            if !last.is_finite() || last <= 0.0 {
                return None;
            }
            let bid = ticker.bid_px.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let ask = ticker.ask_px.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0.0);
            if bid > 0.0 && ask > 0.0 && bid > ask {
                return None;
            }
            Some(Tick::new(
                symbol,
                last,
                bid,
                ask,
                ticker.vol_24h.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0.0),
                frame_timestamp(ticker.ts.as_deref()),
            ))
        }
        "candle1m" => {
            // candle rows are [ts, o, h, l, c, ...]; close is the price
            let cells = row.as_array()?;
            if cells.len() < 5 {
                return None;
            }
            let cell_str = |v: &serde_json::Value| -> Option<String> {
                v.as_str().map(str::to_string).or_else(|| v.as_f64().map(|n| n.to_string()))
            };
            let close = cell_str(&cells[4])?.parse::<f64>().ok()?;
            if !close.is_finite() || close <= 0.0 {
                return None;
            }
            let ts = cell_str(&cells[0]);
            Some(Tick::new(
                symbol,
                close,
                0.0,
                0.0,
                0.0,
                frame_timestamp(ts.as_deref()),
            ))
        }
        _ => None,
    }
}

/// Public WebSocket feed for one symbol
pub struct MarketDataFeed {
    symbol: String,
    ws_url: String,
    latest: Arc<RwLock<Option<Tick>>>,
    tick_tx: broadcast::Sender<Tick>,
    status_tx: watch::Sender<FeedStatus>,
    status_rx: watch::Receiver<FeedStatus>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl MarketDataFeed {
    pub fn new(symbol: impl Into<String>, ws_url: impl Into<String>) -> Self {
        let (tick_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(FeedStatus::Connecting);
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            symbol: symbol.into(),
            ws_url: ws_url.into(),
            latest: Arc::new(RwLock::new(None)),
            tick_tx,
            status_tx,
            status_rx,
            stop_tx,
            stop_rx,
        }
    }

    /// Subscribe to tick events; only events after subscription are seen
    pub fn subscribe(&self) -> broadcast::Receiver<Tick> {
        self.tick_tx.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status_rx.clone()
    }

    /// Most recent tick, regardless of subscription
    pub async fn latest(&self) -> Option<Tick> {
        self.latest.read().await.clone()
    }

    /// Launch the feed task
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Cooperative stop; the task exits at its next suspension point
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    async fn run(&self) {
        let mut failures: u32 = 0;
        let mut stop_rx = self.stop_rx.clone();

        info!(symbol = %self.symbol, "starting market data feed");

        loop {
            if *stop_rx.borrow() {
                info!(symbol = %self.symbol, "feed stopped");
                return;
            }

            let _ = self.status_tx.send(FeedStatus::Connecting);
            let mut frames_seen: u64 = 0;
            let outcome = self.connect_and_stream(&mut stop_rx, &mut frames_seen).await;

            // A connection that actually streamed resets the consecutive
            // failure count, however it ended.
            if frames_seen > 0 {
                failures = 0;
            }
            match outcome {
                Ok(()) => {
                    if *stop_rx.borrow() {
                        info!(symbol = %self.symbol, "feed stopped");
                        return;
                    }
                    if frames_seen == 0 {
                        failures += 1;
                    }
                    info!(symbol = %self.symbol, "feed connection closed");
                }
                Err(e) => {
                    failures += 1;
                    warn!(symbol = %self.symbol, error = %e, attempt = failures, "feed connection error");
                }
            }

            if failures >= MAX_CONSECUTIVE_FAILURES {
                error!(
                    symbol = %self.symbol,
                    failures,
                    "market data link severed; feed degraded, falling back to REST"
                );
                let _ = self.status_tx.send(FeedStatus::Degraded);
                return;
            }

            let delay = backoff_delay(failures.max(1));
            debug!(symbol = %self.symbol, ?delay, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.changed() => {}
            }
        }
    }

    /// One connection lifetime; counts handled push frames into `frames_seen`
    async fn connect_and_stream(
        &self,
        stop_rx: &mut watch::Receiver<bool>,
        frames_seen: &mut u64,
    ) -> Result<()> {
        let url = Url::parse(&self.ws_url)
            .map_err(|e| QuorumError::Internal(format!("invalid WebSocket URL: {}", e)))?;

        let (ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_async(url.as_str()),
        )
        .await
        .map_err(|_| QuorumError::Internal("WebSocket connect timeout".to_string()))??;

        let (mut write, mut read) = ws_stream.split();

        let subscribe = json!({
            "op": "subscribe",
            "args": [
                {"channel": "ticker", "instId": self.symbol},
                {"channel": "candle1m", "instId": self.symbol},
            ],
        });
        write.send(Message::Text(subscribe.to_string())).await?;
        let _ = self.status_tx.send(FeedStatus::Live);
        info!(symbol = %self.symbol, "feed connected and subscribed");

        let mut keepalive = tokio::time::interval(Duration::from_secs(KEEPALIVE_SECS));
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keepalive.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if text == "ping" {
                                write.send(Message::Text("pong".to_string())).await?;
                                continue;
                            }
                            if let Some(tick) = parse_frame(&text, &self.symbol) {
                                *frames_seen += 1;
                                self.publish(tick).await;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            debug!(symbol = %self.symbol, "received close frame");
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(QuorumError::WebSocket(e)),
                        None => return Ok(()),
                        _ => {}
                    }
                }
                _ = keepalive.tick() => {
                    write.send(Message::Text("ping".to_string())).await?;
                }
                _ = stop_rx.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Store and emit unless the price is unchanged
    async fn publish(&self, tick: Tick) {
        {
            let mut latest = self.latest.write().await;
            if let Some(prev) = latest.as_ref() {
                if prev.last_price == tick.last_price {
                    return;
                }
            }
            *latest = Some(tick.clone());
        }
        let _ = self.tick_tx.send(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticker_push_frame() {
        let text = r#"{"action":"push","arg":{"channel":"ticker","instId":"BTCUSDT"},
            "data":[{"last":"88000.5","bidPx":"88000.1","askPx":"88000.9","vol24h":"42.5","ts":"1700000000000"}]}"#;
        let tick = parse_frame(text, "BTCUSDT").unwrap();
        assert_eq!(tick.last_price, 88000.5);
        assert_eq!(tick.bid, 88000.1);
        assert_eq!(tick.ask, 88000.9);
        assert_eq!(tick.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn parses_candle_push_frame() {
        let text = r#"{"action":"push","arg":{"channel":"candle1m","instId":"BTCUSDT"},
            "data":[["1700000000000","87900","88100","87850","88050","12.5"]]}"#;
        let tick = parse_frame(text, "BTCUSDT").unwrap();
        assert_eq!(tick.last_price, 88050.0);
    }

    #[test]
    fn ignores_other_symbols_and_channels() {
        let other_symbol = r#"{"action":"push","arg":{"channel":"ticker","instId":"ETHUSDT"},
            "data":[{"last":"3000"}]}"#;
        assert!(parse_frame(other_symbol, "BTCUSDT").is_none());

        let other_channel = r#"{"action":"push","arg":{"channel":"books","instId":"BTCUSDT"},
            "data":[{"last":"88000"}]}"#;
        assert!(parse_frame(other_channel, "BTCUSDT").is_none());
    }

    #[test]
    fn ignores_subscribe_ack_and_junk() {
        assert!(parse_frame(r#"{"event":"subscribe","arg":{}}"#, "BTCUSDT").is_none());
        assert!(parse_frame("not json at all", "BTCUSDT").is_none());
    }

    #[test]
    fn drops_crossed_or_non_positive_prices() {
        let crossed = r#"{"action":"push","arg":{"channel":"ticker","instId":"BTCUSDT"},
            "data":[{"last":"88000","bidPx":"88001","askPx":"88000"}]}"#;
        assert!(parse_frame(crossed, "BTCUSDT").is_none());

        let zero = r#"{"action":"push","arg":{"channel":"ticker","instId":"BTCUSDT"},
            "data":[{"last":"0"}]}"#;
        assert!(parse_frame(zero, "BTCUSDT").is_none());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(4), Duration::from_secs(16));
        assert_eq!(backoff_delay(5), Duration::from_secs(30));
        assert_eq!(backoff_delay(12), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn duplicate_price_frames_are_suppressed() {
        let feed = Arc::new(MarketDataFeed::new("BTCUSDT", "wss://example.invalid/ws"));
        let mut rx = feed.subscribe();

        let tick = Tick::new("BTCUSDT", 88000.0, 0.0, 0.0, 1.0, Utc::now());
        feed.publish(tick.clone()).await;
        feed.publish(tick.clone()).await;

        let moved = Tick::new("BTCUSDT", 88001.0, 0.0, 0.0, 1.0, Utc::now());
        feed.publish(moved).await;

        assert_eq!(rx.recv().await.unwrap().last_price, 88000.0);
        assert_eq!(rx.recv().await.unwrap().last_price, 88001.0);
        assert!(rx.try_recv().is_err());
    }
}
