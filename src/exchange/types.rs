//! Typed REST boundary structs.
//!
//! All exchange JSON is parsed into these before it reaches the engine;
//! optional fields default inline so no untyped blob crosses the seam.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::PositionSide;

/// Single-symbol ticker from the REST fallback path
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    #[serde(rename = "last")]
    pub last_price: f64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub change_24h: Option<f64>,
}

/// Top-of-book depth, best levels first
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DepthSnapshot {
    /// (price, qty), descending price
    pub bids: Vec<(f64, f64)>,
    /// (price, qty), ascending price
    pub asks: Vec<(f64, f64)>,
}

impl DepthSnapshot {
    /// Order Book Imbalance over the top `levels`:
    /// `(Σbid − Σask) / (Σbid + Σask)`, in [-1, +1].
    pub fn obi(&self, levels: usize) -> Option<f64> {
        let bid_sum: f64 = self.bids.iter().take(levels).map(|(_, q)| q).sum();
        let ask_sum: f64 = self.asks.iter().take(levels).map(|(_, q)| q).sum();
        let total = bid_sum + ask_sum;
        if total <= 0.0 {
            return None;
        }
        Some((bid_sum - ask_sum) / total)
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p)
    }

    /// Spread in basis points of the bid
    pub fn spread_bps(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if bid > 0.0 => Some((ask - bid) / bid * 10_000.0),
            _ => None,
        }
    }
}

/// One OHLCV row, oldest-first in API responses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Parse a `[t,o,h,l,c,v,...]` row; extra trailing columns ignored.
    pub fn from_row(row: &[serde_json::Value]) -> Option<Self> {
        fn num(v: &serde_json::Value) -> Option<f64> {
            v.as_f64().or_else(|| v.as_str()?.parse().ok())
        }
        if row.len() < 6 {
            return None;
        }
        Some(Self {
            ts: num(&row[0])? as i64,
            open: num(&row[1])?,
            high: num(&row[2])?,
            low: num(&row[3])?,
            close: num(&row[4])?,
            volume: num(&row[5])?,
        })
    }
}

/// Current funding for a perpetual
#[derive(Debug, Clone, Deserialize)]
pub struct FundingRate {
    pub funding_rate: f64,
    #[serde(default)]
    pub next_funding_time: Option<i64>,
}

/// Account asset line
#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub coin_name: String,
    pub equity: Decimal,
    pub available: Decimal,
    #[serde(default)]
    pub frozen: Option<Decimal>,
}

/// Open contract position as the exchange reports it
#[derive(Debug, Clone, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub hold_side: PositionSide,
    pub total: Decimal,
    pub average_open_price: Decimal,
    #[serde(default)]
    pub unrealized_pl: Decimal,
}

/// Acknowledgement of a placed order
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    #[serde(default)]
    pub client_oid: Option<String>,
}

/// Historical order line (opaque to the engine; surfaced for audits)
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub price_avg: Option<Decimal>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub c_time: Option<i64>,
}

/// Payload for the venue's AI decision audit sink
#[derive(Debug, Clone, Serialize)]
pub struct AiLogEntry {
    pub stage: String,
    pub model: String,
    pub input: String,
    pub output: String,
    pub explanation: String,
}

/// Audit sink acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub struct AiLogAck {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn obi_over_top_levels() {
        let depth = DepthSnapshot {
            bids: vec![(100.0, 60.0), (99.9, 40.0), (99.8, 500.0)],
            asks: vec![(100.1, 30.0), (100.2, 20.0), (100.3, 500.0)],
        };
        // top 2 levels: (100 - 50) / 150
        let obi = depth.obi(2).unwrap();
        assert!((obi - (50.0 / 150.0)).abs() < 1e-12);
    }

    #[test]
    fn obi_empty_book_is_none() {
        assert!(DepthSnapshot::default().obi(10).is_none());
    }

    #[test]
    fn candle_parses_string_columns() {
        let row = vec![
            json!("1700000000000"),
            json!("100.5"),
            json!("101.0"),
            json!("99.5"),
            json!("100.8"),
            json!("1234.5"),
            json!("extra"),
        ];
        let candle = Candle::from_row(&row).unwrap();
        assert_eq!(candle.ts, 1_700_000_000_000);
        assert_eq!(candle.close, 100.8);
    }

    #[test]
    fn candle_rejects_short_row() {
        let row = vec![json!(1), json!(2)];
        assert!(Candle::from_row(&row).is_none());
    }
}
