use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("unknown market: {0}")]
    UnknownMarket(String),
    #[error("invalid simulator parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

/// Synthetic volatility indices that tick once per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "V10_1S")]
    V10,
    #[serde(rename = "V25_1S")]
    V25,
    #[serde(rename = "V50_1S")]
    V50,
    #[serde(rename = "V75_1S")]
    V75,
    #[serde(rename = "V100_1S")]
    V100,
}

impl Market {
    pub const ALL: [Market; 5] = [Market::V10, Market::V25, Market::V50, Market::V75, Market::V100];

    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Market::V10 => "V10_1S",
            Market::V25 => "V25_1S",
            Market::V50 => "V50_1S",
            Market::V75 => "V75_1S",
            Market::V100 => "V100_1S",
        }
    }

    /// Symbol understood by the streaming feed.
    #[inline]
    pub fn feed_symbol(&self) -> &'static str {
        match self {
            Market::V10 => "1HZ10V",
            Market::V25 => "1HZ25V",
            Market::V50 => "1HZ50V",
            Market::V75 => "1HZ75V",
            Market::V100 => "1HZ100V",
        }
    }

    #[inline]
    pub fn label(&self) -> &'static str {
        match self {
            Market::V10 => "Volatility 10 (1s) Index",
            Market::V25 => "Volatility 25 (1s) Index",
            Market::V50 => "Volatility 50 (1s) Index",
            Market::V75 => "Volatility 75 (1s) Index",
            Market::V100 => "Volatility 100 (1s) Index",
        }
    }

    #[inline]
    pub fn volatility_index(&self) -> u32 {
        match self {
            Market::V10 => 10,
            Market::V25 => 25,
            Market::V50 => 50,
            Market::V75 => 75,
            Market::V100 => 100,
        }
    }

    /// Per-tick volatility used when simulating this market offline.
    #[inline]
    pub fn simulated_volatility(&self) -> f64 {
        self.volatility_index() as f64 / 10_000.0
    }

    pub fn from_feed_symbol(symbol: &str) -> Option<Market> {
        Market::ALL.iter().copied().find(|m| m.feed_symbol() == symbol)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Market {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Market::ALL
            .iter()
            .copied()
            .find(|m| m.code().eq_ignore_ascii_case(trimmed) || m.feed_symbol() == trimmed)
            .ok_or_else(|| MarketDataError::UnknownMarket(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub quote: f64,
    pub epoch: i64,
}

impl Tick {
    #[inline]
    pub fn new(symbol: impl Into<String>, quote: f64, epoch: i64) -> Self {
        Self {
            symbol: symbol.into(),
            quote,
            epoch,
        }
    }

    #[inline]
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.epoch, 0).single()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub epoch: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    #[inline]
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.epoch, 0).single()
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    #[inline]
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}
