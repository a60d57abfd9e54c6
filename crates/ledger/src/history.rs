use chrono::{DateTime, Utc};
use market_data::Market;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeOutcome {
    Won,
    Lost,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    MaxTicks,
    MaxPayout,
    TakeProfit,
    Breach,
    UserStop,
}

impl CloseReason {
    #[inline]
    pub fn outcome(&self) -> TradeOutcome {
        match self {
            CloseReason::MaxTicks | CloseReason::MaxPayout | CloseReason::TakeProfit => TradeOutcome::Won,
            CloseReason::Breach => TradeOutcome::Lost,
            CloseReason::UserStop => TradeOutcome::Cancelled,
        }
    }
}

/// Immutable snapshot of a contract at the moment it closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub contract_id: Uuid,
    pub market: Market,
    pub stake: f64,
    pub growth_rate_percent: u8,
    pub take_profit: Option<f64>,
    pub tick_count: u32,
    /// Realized profit; `-stake` for a lost contract.
    pub profit: f64,
    /// Amount credited back to the account at settlement.
    pub payout: f64,
    pub outcome: TradeOutcome,
    pub reason: CloseReason,
    pub entry_spot: f64,
    pub exit_spot: f64,
    pub tick_run_history: Vec<u32>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TradeRecord {
    #[inline]
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total: usize,
    pub won: usize,
    pub lost: usize,
    pub cancelled: usize,
    pub total_staked: f64,
    pub net_profit: f64,
    pub win_rate: f64,
}

/// Append-only, ordered record of closed contracts.
#[derive(Debug, Default)]
pub struct TradeHistoryStore {
    records: RwLock<Vec<TradeRecord>>,
}

impl TradeHistoryStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: TradeRecord) {
        info!(
            "Recorded {:?} trade {} on {}: {} ticks, profit {:.2}",
            record.outcome, record.contract_id, record.market, record.tick_count, record.profit
        );
        self.records.write().push(record);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn records(&self) -> Vec<TradeRecord> {
        self.records.read().clone()
    }

    pub fn get(&self, contract_id: Uuid) -> Option<TradeRecord> {
        self.records.read().iter().find(|r| r.contract_id == contract_id).cloned()
    }

    pub fn last(&self) -> Option<TradeRecord> {
        self.records.read().last().cloned()
    }

    pub fn by_market(&self, market: Market) -> Vec<TradeRecord> {
        self.records.read().iter().filter(|r| r.market == market).cloned().collect()
    }

    /// Distinct markets in the order they first appear.
    pub fn markets(&self) -> Vec<Market> {
        let records = self.records.read();
        let mut markets = Vec::new();
        for record in records.iter() {
            if !markets.contains(&record.market) {
                markets.push(record.market);
            }
        }
        markets
    }

    pub fn summary(&self) -> HistorySummary {
        let records = self.records.read();
        let mut summary = HistorySummary {
            total: records.len(),
            ..HistorySummary::default()
        };

        for record in records.iter() {
            match record.outcome {
                TradeOutcome::Won => summary.won += 1,
                TradeOutcome::Lost => summary.lost += 1,
                TradeOutcome::Cancelled => summary.cancelled += 1,
            }
            summary.total_staked += record.stake;
            summary.net_profit += record.profit;
        }

        if summary.total > 0 {
            summary.win_rate = summary.won as f64 / summary.total as f64 * 100.0;
        }
        summary
    }
}
