use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Immutable market snapshot produced by the feed on each inbound push.
///
/// `last_price` is always positive and `bid <= ask` whenever both sides
/// are quoted; a breach of either is a feed bug and panics loudly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub last_price: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume_24h: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn new(
        symbol: impl Into<String>,
        last_price: f64,
        bid: f64,
        ask: f64,
        volume_24h: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        assert!(
            last_price.is_finite() && last_price > 0.0,
            "tick last_price must be positive, got {last_price}"
        );
        assert!(
            !(bid > 0.0 && ask > 0.0) || bid <= ask,
            "crossed tick: bid {bid} > ask {ask}"
        );
        Self {
            symbol: symbol.into(),
            last_price,
            bid,
            ask,
            volume_24h,
            timestamp,
        }
    }

    /// Mid price when both sides are quoted, else the last trade price
    pub fn mid(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            (self.bid + self.ask) / 2.0
        } else {
            self.last_price
        }
    }
}

/// Bounded history of the most recent prices for one symbol.
///
/// Owned exclusively by the hot loop; oldest entry evicted on overflow.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    prices: VecDeque<f64>,
    capacity: usize,
}

impl PriceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            prices: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, price: f64) {
        if self.prices.len() == self.capacity {
            self.prices.pop_front();
        }
        self.prices.push_back(price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.prices.back().copied()
    }

    /// Prices oldest-first, contiguous
    pub fn to_vec(&self) -> Vec<f64> {
        self.prices.iter().copied().collect()
    }
}
