//! Textbook indicator math on plain price slices.
//!
//! Pure functions, no I/O. Callers treat `None` as "not enough history"
//! and contribute zero to any downstream signal.

/// Relative Strength Index over the trailing `period` changes.
///
/// RSI > 70 is overbought, RSI < 30 oversold.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in prices[prices.len() - period - 1..].windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses += -change;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Exponential moving average, SMA-seeded
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut value: f64 = prices[..period].iter().sum::<f64>() / period as f64;
    for price in &prices[period..] {
        value = price * k + value * (1.0 - k);
    }
    Some(value)
}

/// MACD line, signal line, histogram (12/26/9 by convention)
pub fn macd(
    prices: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<(f64, f64, f64)> {
    if prices.len() < slow + signal_period {
        return None;
    }

    let macd_series: Vec<f64> = (slow..=prices.len())
        .map(|end| {
            let window = &prices[..end];
            Some(ema(window, fast)? - ema(window, slow)?)
        })
        .collect::<Option<_>>()?;

    let line = *macd_series.last()?;
    let signal = ema(&macd_series, signal_period)?;
    Some((line, signal, line - signal))
}

/// Bollinger bands: (upper, middle, lower) at `k` standard deviations
pub fn bollinger(prices: &[f64], period: usize, k: f64) -> Option<(f64, f64, f64)> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let window = &prices[prices.len() - period..];
    let mid = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|p| (p - mid).powi(2)).sum::<f64>() / period as f64;
    let dev = variance.sqrt();
    Some((mid + k * dev, mid, mid - k * dev))
}

/// Average True Range from aligned high/low/close series
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let len = highs.len().min(lows.len()).min(closes.len());
    if period == 0 || len < period + 1 {
        return None;
    }

    let mut sum = 0.0;
    for i in len - period..len {
        let range = highs[i] - lows[i];
        let up = (highs[i] - closes[i - 1]).abs();
        let down = (lows[i] - closes[i - 1]).abs();
        sum += range.max(up).max(down);
    }
    Some(sum / period as f64)
}

/// Fractional price change over the trailing `lookback` ticks
pub fn momentum(prices: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || prices.len() < lookback + 1 {
        return None;
    }
    let current = *prices.last()?;
    let past = prices[prices.len() - 1 - lookback];
    if past == 0.0 {
        return None;
    }
    Some((current - past) / past)
}

/// Volume-synchronized probability of informed trading over
/// (buy, sell) volume buckets
pub fn vpin(buckets: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = buckets.iter().map(|(b, s)| b + s).sum();
    if buckets.is_empty() || total <= 0.0 {
        return None;
    }
    let imbalance: f64 = buckets.iter().map(|(b, s)| (b - s).abs()).sum();
    Some(imbalance / total)
}

/// Kelly fraction for win probability `p` and win/loss ratio `b`,
/// floored at zero (never bet a negative edge)
pub fn kelly_fraction(p: f64, b: f64) -> f64 {
    if b <= 0.0 || !(0.0..=1.0).contains(&p) {
        return 0.0;
    }
    (p - (1.0 - p) / b).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_of_steady_rally_is_max() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&prices, 14), Some(100.0));
    }

    #[test]
    fn rsi_of_steady_selloff_is_min() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.5).collect();
        let value = rsi(&prices, 14).unwrap();
        assert!(value < 1e-9);
    }

    #[test]
    fn rsi_mixed_moves_is_interior() {
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];
        let value = rsi(&prices, 14).unwrap();
        assert!(value > 50.0 && value < 100.0);
    }

    #[test]
    fn rsi_needs_period_plus_one() {
        assert!(rsi(&[1.0; 14], 14).is_none());
        assert!(rsi(&[1.0; 15], 14).is_some());
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let prices = vec![50.0; 30];
        let value = ema(&prices, 20).unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn ema_tracks_recent_prices() {
        let mut prices = vec![100.0; 20];
        prices.extend(std::iter::repeat(110.0).take(20));
        let value = ema(&prices, 20).unwrap();
        assert!(value > 105.0 && value < 110.0);
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 * 1.002_f64.powi(i)).collect();
        let (line, _, _) = macd(&prices, 12, 26, 9).unwrap();
        assert!(line > 0.0);
    }

    #[test]
    fn bollinger_brackets_the_mean() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + (i % 4) as f64).collect();
        let (upper, mid, lower) = bollinger(&prices, 20, 2.0).unwrap();
        assert!(lower < mid && mid < upper);
    }

    #[test]
    fn atr_of_flat_market_is_zero() {
        let flat = vec![100.0; 20];
        let value = atr(&flat, &flat, &flat, 14).unwrap();
        assert!(value.abs() < 1e-12);
    }

    #[test]
    fn momentum_measures_lookback_change() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        // (119 - 109) / 109
        let value = momentum(&prices, 10).unwrap();
        assert!((value - 10.0 / 109.0).abs() < 1e-12);
    }

    #[test]
    fn vpin_all_one_sided_is_one() {
        let buckets = vec![(10.0, 0.0), (5.0, 0.0)];
        assert!((vpin(&buckets).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn vpin_balanced_is_zero() {
        let buckets = vec![(10.0, 10.0), (3.0, 3.0)];
        assert!(vpin(&buckets).unwrap().abs() < 1e-12);
    }

    #[test]
    fn kelly_never_negative() {
        assert_eq!(kelly_fraction(0.4, 1.0), 0.0);
        let edge = kelly_fraction(0.6, 2.0);
        assert!((edge - 0.4).abs() < 1e-12);
    }
}
