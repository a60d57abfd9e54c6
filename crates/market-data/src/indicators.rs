//! Technical indicators over a window of tick quotes, and the naive
//! next-tick vote built on top of them.

use serde::{Deserialize, Serialize};

pub const RSI_PERIOD: usize = 14;
pub const SMA_FAST: usize = 20;
pub const SMA_SLOW: usize = 50;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_WIDTH: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi: f64,
    pub macd: MacdValue,
    pub sma20: f64,
    pub sma50: f64,
    pub bollinger: BollingerBands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictedDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub direction: PredictedDirection,
    pub confidence: f64,
    pub next_price: f64,
}

impl IndicatorSet {
    /// Returns `None` for an empty window.
    pub fn from_prices(prices: &[f64]) -> Option<Self> {
        if prices.is_empty() {
            return None;
        }

        Some(Self {
            rsi: rsi(prices, RSI_PERIOD),
            macd: macd(prices)?,
            sma20: sma(prices, SMA_FAST)?,
            sma50: sma(prices, SMA_SLOW)?,
            bollinger: bollinger(prices, BOLLINGER_PERIOD, BOLLINGER_WIDTH)?,
        })
    }

    /// Combines four votes (RSI, MACD, SMA20, Bollinger) into a direction and
    /// an expected next price.
    pub fn predict(&self, prices: &[f64]) -> Option<Prediction> {
        let last = *prices.last()?;

        let votes = [
            if self.rsi > 70.0 { -1 } else if self.rsi < 30.0 { 1 } else { 0 },
            if self.macd.macd_line > self.macd.signal_line { 1 } else { -1 },
            if last > self.sma20 { 1 } else { -1 },
            if last > self.bollinger.upper { -1 } else if last < self.bollinger.lower { 1 } else { 0 },
        ];

        let strength: i32 = votes.iter().sum();
        let confidence = strength.abs() as f64 / votes.len() as f64;
        let direction = if strength > 0 { PredictedDirection::Up } else { PredictedDirection::Down };

        let expected_move = last * volatility(prices) * confidence * 0.5;
        let next_price = match direction {
            PredictedDirection::Up => last + expected_move,
            PredictedDirection::Down => last - expected_move,
        };

        Some(Prediction { direction, confidence, next_price })
    }
}

/// Computes the indicator set over `prices` and votes on the next tick.
pub fn predict_next_tick(prices: &[f64]) -> Option<Prediction> {
    IndicatorSet::from_prices(prices)?.predict(prices)
}

/// Simple moving average of the last `period` prices; falls back to the last
/// price when the window is shorter than `period`.
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    let last = *prices.last()?;
    if period == 0 || prices.len() < period {
        return Some(last);
    }
    let window = &prices[prices.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    let mut series = Vec::with_capacity(prices.len());
    let Some(&first) = prices.first() else {
        return series;
    };

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = first;
    series.push(ema);
    for &price in &prices[1..] {
        ema = (price - ema) * multiplier + ema;
        series.push(ema);
    }
    series
}

pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    let last = *prices.last()?;
    if prices.len() < period {
        return Some(last);
    }
    ema_series(prices, period).last().copied()
}

/// RSI over the last `period` price changes. 50 when there is not enough data.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }

    let (gains, losses) = prices[prices.len() - period - 1..]
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold((0.0, 0.0), |(g, l), d| if d >= 0.0 { (g + d, l) } else { (g, l - d) });

    if losses == 0.0 {
        return if gains == 0.0 { 50.0 } else { 100.0 };
    }

    let rs = (gains / period as f64) / (losses / period as f64);
    100.0 - 100.0 / (1.0 + rs)
}

pub fn macd(prices: &[f64]) -> Option<MacdValue> {
    if prices.is_empty() {
        return None;
    }

    let fast = ema_series(prices, 12);
    let slow = ema_series(prices, 26);
    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema_series(&line, 9);

    let macd_line = *line.last()?;
    let signal_line = *signal.last()?;
    Some(MacdValue {
        macd_line,
        signal_line,
        histogram: macd_line - signal_line,
    })
}

pub fn bollinger(prices: &[f64], period: usize, width: f64) -> Option<BollingerBands> {
    let middle = sma(prices, period)?;
    let window = if period > 0 && prices.len() >= period {
        &prices[prices.len() - period..]
    } else {
        prices
    };

    let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / window.len() as f64;
    let std = variance.sqrt();

    Some(BollingerBands {
        upper: middle + std * width,
        middle,
        lower: middle - std * width,
    })
}

/// Population standard deviation of log returns. Zero for fewer than two
/// usable prices.
pub fn volatility(prices: &[f64]) -> f64 {
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();

    if returns.is_empty() {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}
