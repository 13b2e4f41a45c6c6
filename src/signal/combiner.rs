//! Deterministic fusion of local indicators into one scalar.
//!
//! `combine` is pure and side-effect free: price history in, depth
//! snapshot in, weighted sum out. Channels with missing history
//! contribute zero; the sum is not re-normalized.

use crate::config::SignalWeights;
use crate::exchange::DepthSnapshot;

use super::indicators::{ema, momentum, rsi};

const OBI_LEVELS: usize = 10;
const RSI_PERIOD: usize = 14;
const EMA_PERIOD: usize = 20;
const MOMENTUM_LOOKBACK: usize = 10;

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

fn clamp(value: f64, bound: f64) -> f64 {
    value.clamp(-bound, bound)
}

/// Combined signal in roughly [-1, 1]; channel clamps bound it to [-2, 2].
pub fn combine(prices: &[f64], depth: &DepthSnapshot, weights: &SignalWeights) -> f64 {
    let mut signal = 0.0;

    // Order-book imbalance over the top of book
    if let Some(obi) = depth.obi(OBI_LEVELS) {
        signal += obi * weights.obi;
    }

    // Mean-reversion kick at RSI extremes
    if let Some(rsi) = rsi(prices, RSI_PERIOD) {
        let contribution = if rsi < RSI_OVERSOLD {
            0.5
        } else if rsi > RSI_OVERBOUGHT {
            -0.5
        } else {
            0.0
        };
        signal += contribution * weights.rsi;
    }

    // Deviation from the EMA, magnified then clamped
    if let (Some(ema), Some(&price)) = (ema(prices, EMA_PERIOD), prices.last()) {
        if ema != 0.0 {
            let deviation = (price - ema) / ema;
            signal += clamp(deviation * 10.0, 0.5) * weights.ema;
        }
    }

    // Short-horizon momentum, magnified then clamped
    if let Some(m) = momentum(prices, MOMENTUM_LOOKBACK) {
        signal += clamp(m * 20.0, 0.5) * weights.momentum;
    }

    signal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(from: f64, to: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| from + (to - from) * i as f64 / (n - 1) as f64)
            .collect()
    }

    fn bid_heavy_depth() -> DepthSnapshot {
        DepthSnapshot {
            bids: (0..10).map(|i| (87999.0 - i as f64, 10.0)).collect(),
            asks: (0..10).map(|i| (88001.0 + i as f64, 5.0)).collect(),
        }
    }

    #[test]
    fn empty_inputs_produce_zero() {
        let value = combine(&[], &DepthSnapshot::default(), &SignalWeights::default());
        assert_eq!(value, 0.0);
    }

    #[test]
    fn bullish_ramp_with_bid_heavy_book_is_positive() {
        let prices = ramp(87000.0, 88000.0, 50);
        let value = combine(&prices, &bid_heavy_depth(), &SignalWeights::default());
        assert!(value > 0.0, "expected positive signal, got {value}");
    }

    #[test]
    fn bearish_ramp_with_ask_heavy_book_is_negative() {
        let prices = ramp(88000.0, 87000.0, 50);
        let depth = DepthSnapshot {
            bids: (0..10).map(|i| (86999.0 - i as f64, 5.0)).collect(),
            asks: (0..10).map(|i| (87001.0 + i as f64, 10.0)).collect(),
        };
        let value = combine(&prices, &depth, &SignalWeights::default());
        assert!(value < 0.0, "expected negative signal, got {value}");
    }

    #[test]
    fn output_is_finite_and_bounded() {
        let spiky: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 1.0 } else { 1000.0 })
            .collect();
        let heavy = SignalWeights {
            obi: 1.0,
            rsi: 1.0,
            ema: 1.0,
            momentum: 1.0,
            funding: 0.0,
        };
        let value = combine(&spiky, &bid_heavy_depth(), &heavy);
        assert!(value.is_finite());
        assert!((-2.0..=2.0).contains(&value), "out of bounds: {value}");
    }

    #[test]
    fn missing_history_drops_channels_not_the_call() {
        // 5 prices: not enough for RSI/EMA/momentum; OBI still counts
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0];
        let value = combine(&prices, &bid_heavy_depth(), &SignalWeights::default());
        let obi_only = bid_heavy_depth().obi(10).unwrap() * SignalWeights::default().obi;
        assert!((value - obi_only).abs() < 1e-12);
    }
}
