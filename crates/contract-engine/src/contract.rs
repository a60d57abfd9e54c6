use crate::config::EngineConfig;
use crate::{EngineError, Result};
use chrono::{DateTime, Utc};
use ledger::{CloseReason, TradeOutcome, TradeRecord};
use market_data::Market;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Growth rate to tolerance margin (fractional move allowed between two
/// consecutive ticks).
const TOLERANCE_MARGINS: [(u8, f64); 5] = [
    (1, 0.0010),
    (2, 0.0015),
    (3, 0.0020),
    (4, 0.0025),
    (5, 0.0030),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct GrowthRate(u8);

impl GrowthRate {
    pub const ALL: [GrowthRate; 5] = [GrowthRate(1), GrowthRate(2), GrowthRate(3), GrowthRate(4), GrowthRate(5)];

    #[inline]
    pub fn new(percent: u8) -> Result<Self> {
        if TOLERANCE_MARGINS.iter().any(|(rate, _)| *rate == percent) {
            Ok(Self(percent))
        } else {
            Err(EngineError::UnsupportedGrowthRate(percent))
        }
    }

    #[inline]
    pub fn percent(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn multiplier(&self) -> f64 {
        1.0 + self.0 as f64 / 100.0
    }

    #[inline]
    pub fn tolerance_margin(&self) -> f64 {
        TOLERANCE_MARGINS
            .iter()
            .find(|(rate, _)| *rate == self.0)
            .map(|(_, margin)| *margin)
            .unwrap_or(0.0)
    }
}

impl TryFrom<u8> for GrowthRate {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self> {
        GrowthRate::new(value)
    }
}

impl From<GrowthRate> for u8 {
    fn from(rate: GrowthRate) -> u8 {
        rate.0
    }
}

impl fmt::Display for GrowthRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Profit after `ticks` accepted ticks, always recomputed from scratch.
#[inline]
pub fn compound_profit(stake: f64, growth_rate: GrowthRate, ticks: u32) -> f64 {
    let exponent = i32::try_from(ticks).unwrap_or(i32::MAX);
    stake * growth_rate.multiplier().powi(exponent) - stake
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractStatus {
    Pending,
    Active,
    Won,
    Lost,
    Cancelled,
}

impl ContractStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContractStatus::Won | ContractStatus::Lost | ContractStatus::Cancelled)
    }

    #[inline]
    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        matches!(
            (self, next),
            (ContractStatus::Pending, ContractStatus::Active)
                | (ContractStatus::Active, ContractStatus::Won)
                | (ContractStatus::Active, ContractStatus::Lost)
                | (ContractStatus::Active, ContractStatus::Cancelled)
        )
    }
}

impl From<TradeOutcome> for ContractStatus {
    fn from(outcome: TradeOutcome) -> Self {
        match outcome {
            TradeOutcome::Won => ContractStatus::Won,
            TradeOutcome::Lost => ContractStatus::Lost,
            TradeOutcome::Cancelled => ContractStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartParams {
    pub market: Market,
    pub stake: f64,
    pub growth_rate: GrowthRate,
    pub take_profit: Option<f64>,
}

impl StartParams {
    pub fn new(market: Market, stake: f64, growth_rate: GrowthRate) -> Self {
        Self {
            market,
            stake,
            growth_rate,
            take_profit: None,
        }
    }

    pub fn with_take_profit(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn validate(&self, entry_spot: f64) -> Result<()> {
        if !self.stake.is_finite() || self.stake <= 0.0 {
            return Err(EngineError::InvalidParameters(format!("stake must be positive, got {}", self.stake)));
        }
        if !entry_spot.is_finite() || entry_spot <= 0.0 {
            return Err(EngineError::InvalidParameters(format!("entry spot must be positive, got {}", entry_spot)));
        }
        if let Some(take_profit) = self.take_profit {
            if !take_profit.is_finite() || take_profit <= 0.0 {
                return Err(EngineError::InvalidParameters(format!(
                    "take profit must be positive, got {}",
                    take_profit
                )));
            }
        }
        Ok(())
    }
}

/// Result of feeding one price into an active contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickVerdict {
    Accepted,
    Won(CloseReason),
    Breached,
}

#[derive(Debug, Clone)]
pub struct Contract {
    pub id: Uuid,
    pub market: Market,
    pub stake: f64,
    pub growth_rate: GrowthRate,
    pub take_profit: Option<f64>,
    pub status: ContractStatus,
    pub tick_count: u32,
    pub current_profit: f64,
    pub entry_spot: f64,
    pub last_price: f64,
    pub consecutive_tick_run: u32,
    pub tick_run_history: Vec<u32>,
    pub start_time: DateTime<Utc>,
    breach_price: Option<f64>,
}

impl Contract {
    pub fn pending(params: StartParams, entry_spot: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            market: params.market,
            stake: params.stake,
            growth_rate: params.growth_rate,
            take_profit: params.take_profit,
            status: ContractStatus::Pending,
            tick_count: 0,
            current_profit: 0.0,
            entry_spot,
            last_price: entry_spot,
            consecutive_tick_run: 0,
            tick_run_history: Vec::new(),
            start_time: Utc::now(),
            breach_price: None,
        }
    }

    fn transition(&mut self, next: ContractStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidStateTransition {
                from: Some(self.status),
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn activate(&mut self) -> Result<()> {
        self.transition(ContractStatus::Active)?;
        self.tick_count = 0;
        self.current_profit = 0.0;
        self.consecutive_tick_run = 0;
        self.start_time = Utc::now();
        Ok(())
    }

    #[inline]
    pub fn price_change(&self, price: f64) -> f64 {
        (price - self.last_price).abs() / self.last_price
    }

    /// Accepts or breaches on `price`. Win limits are only checked for an
    /// accepted tick, so a tick can never both breach and win.
    pub fn apply_price(&mut self, price: f64, config: &EngineConfig) -> TickVerdict {
        if self.price_change(price) > self.growth_rate.tolerance_margin() {
            self.tick_run_history.push(self.consecutive_tick_run);
            self.consecutive_tick_run = 0;
            self.breach_price = Some(price);
            return TickVerdict::Breached;
        }

        self.tick_count += 1;
        self.consecutive_tick_run += 1;
        self.current_profit = compound_profit(self.stake, self.growth_rate, self.tick_count);
        self.last_price = price;

        if self.tick_count >= config.max_ticks {
            TickVerdict::Won(CloseReason::MaxTicks)
        } else if self.current_profit >= config.max_payout {
            TickVerdict::Won(CloseReason::MaxPayout)
        } else if self.take_profit.is_some_and(|target| self.current_profit >= target) {
            TickVerdict::Won(CloseReason::TakeProfit)
        } else {
            TickVerdict::Accepted
        }
    }

    #[inline]
    pub fn potential_payout(&self) -> f64 {
        self.stake + self.current_profit
    }

    /// Moves the contract to its terminal status and produces the settlement
    /// snapshot. Lost contracts forfeit the whole stake.
    pub fn close(mut self, reason: CloseReason) -> Result<TradeRecord> {
        let outcome = reason.outcome();
        self.transition(outcome.into())?;

        let (profit, payout) = match outcome {
            TradeOutcome::Lost => (-self.stake, 0.0),
            TradeOutcome::Won | TradeOutcome::Cancelled => (self.current_profit, self.potential_payout()),
        };

        Ok(TradeRecord {
            contract_id: self.id,
            market: self.market,
            stake: self.stake,
            growth_rate_percent: self.growth_rate.percent(),
            take_profit: self.take_profit,
            tick_count: self.tick_count,
            profit,
            payout,
            outcome,
            reason,
            entry_spot: self.entry_spot,
            exit_spot: self.breach_price.unwrap_or(self.last_price),
            tick_run_history: self.tick_run_history,
            start_time: self.start_time,
            end_time: Utc::now(),
        })
    }

    pub fn view(&self) -> ContractView {
        ContractView {
            id: self.id,
            market: self.market,
            stake: self.stake,
            growth_rate: self.growth_rate,
            take_profit: self.take_profit,
            status: self.status,
            tick_count: self.tick_count,
            current_profit: self.current_profit,
            last_price: self.last_price,
            start_time: self.start_time,
        }
    }
}

/// Read-only projection handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractView {
    pub id: Uuid,
    pub market: Market,
    pub stake: f64,
    pub growth_rate: GrowthRate,
    pub take_profit: Option<f64>,
    pub status: ContractStatus,
    pub tick_count: u32,
    pub current_profit: f64,
    pub last_price: f64,
    pub start_time: DateTime<Utc>,
}

impl ContractView {
    #[inline]
    pub fn potential_payout(&self) -> f64 {
        self.stake + self.current_profit
    }
}
