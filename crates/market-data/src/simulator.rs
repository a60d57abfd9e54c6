use crate::types::{Market, MarketDataError};
use crate::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Random-walk price process used when no live feed is attached.
///
/// Each step moves the price by `price * (volatility * u1 + trend * u2)` where
/// `u1` and `u2` are independent draws on `[-0.5, 0.5]`. The price never goes
/// below zero.
#[derive(Debug, Clone)]
pub struct PriceSimulator {
    initial_price: f64,
    current_price: f64,
    volatility: f64,
    trend: f64,
    rng: StdRng,
}

impl PriceSimulator {
    pub fn new(initial_price: f64, volatility: f64, trend: f64) -> Result<Self> {
        Self::build(initial_price, volatility, trend, StdRng::from_entropy())
    }

    pub fn with_seed(initial_price: f64, volatility: f64, trend: f64, seed: u64) -> Result<Self> {
        Self::build(initial_price, volatility, trend, StdRng::seed_from_u64(seed))
    }

    pub fn for_market(market: Market, initial_price: f64) -> Result<Self> {
        Self::new(initial_price, market.simulated_volatility(), 0.0)
    }

    fn build(initial_price: f64, volatility: f64, trend: f64, rng: StdRng) -> Result<Self> {
        check_finite("initial_price", initial_price)?;
        if initial_price < 0.0 {
            return Err(MarketDataError::InvalidParameter { name: "initial_price", value: initial_price });
        }
        check_finite("volatility", volatility)?;
        check_finite("trend", trend)?;

        Ok(Self {
            initial_price,
            current_price: initial_price,
            volatility,
            trend,
            rng,
        })
    }

    #[inline]
    pub fn next_price(&mut self) -> f64 {
        let u1: f64 = self.rng.gen::<f64>() - 0.5;
        let u2: f64 = self.rng.gen::<f64>() - 0.5;

        let change = self.current_price * (self.volatility * u1 + self.trend * u2);
        self.current_price = (self.current_price + change).max(0.0);
        self.current_price
    }

    #[inline]
    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    #[inline]
    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    #[inline]
    pub fn trend(&self) -> f64 {
        self.trend
    }

    pub fn set_volatility(&mut self, volatility: f64) -> Result<()> {
        check_finite("volatility", volatility)?;
        self.volatility = volatility;
        Ok(())
    }

    pub fn set_trend(&mut self, trend: f64) -> Result<()> {
        check_finite("trend", trend)?;
        self.trend = trend;
        Ok(())
    }

    pub fn restart(&mut self) {
        debug!("Restarting price simulator at {}", self.initial_price);
        self.current_price = self.initial_price;
    }
}

impl Iterator for PriceSimulator {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        Some(self.next_price())
    }
}

fn check_finite(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MarketDataError::InvalidParameter { name, value })
    }
}
