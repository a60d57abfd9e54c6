//! Counters for contract activity, mirrored into the `metrics` facade.

use ledger::TradeOutcome;
use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineMetrics {
    contracts_opened: AtomicU64,
    contracts_won: AtomicU64,
    contracts_lost: AtomicU64,
    contracts_cancelled: AtomicU64,
    ticks_accepted: AtomicU64,
    ticks_rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub contracts_opened: u64,
    pub contracts_won: u64,
    pub contracts_lost: u64,
    pub contracts_cancelled: u64,
    pub ticks_accepted: u64,
    pub ticks_rejected: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_opened(&self, stake: f64) {
        self.contracts_opened.fetch_add(1, Ordering::Relaxed);
        counter!("accumulator_contracts_opened_total").increment(1);
        gauge!("accumulator_last_stake").set(stake);
    }

    pub fn record_tick_accepted(&self, current_profit: f64) {
        self.ticks_accepted.fetch_add(1, Ordering::Relaxed);
        counter!("accumulator_ticks_accepted_total").increment(1);
        gauge!("accumulator_current_profit").set(current_profit);
    }

    pub fn record_tick_rejected(&self) {
        self.ticks_rejected.fetch_add(1, Ordering::Relaxed);
        counter!("accumulator_ticks_rejected_total").increment(1);
    }

    pub fn record_closed(&self, outcome: TradeOutcome, tick_count: u32) {
        let (slot, name) = match outcome {
            TradeOutcome::Won => (&self.contracts_won, "accumulator_contracts_won_total"),
            TradeOutcome::Lost => (&self.contracts_lost, "accumulator_contracts_lost_total"),
            TradeOutcome::Cancelled => (&self.contracts_cancelled, "accumulator_contracts_cancelled_total"),
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!(name).increment(1);
        histogram!("accumulator_contract_ticks").record(tick_count as f64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            contracts_opened: self.contracts_opened.load(Ordering::Relaxed),
            contracts_won: self.contracts_won.load(Ordering::Relaxed),
            contracts_lost: self.contracts_lost.load(Ordering::Relaxed),
            contracts_cancelled: self.contracts_cancelled.load(Ordering::Relaxed),
            ticks_accepted: self.ticks_accepted.load(Ordering::Relaxed),
            ticks_rejected: self.ticks_rejected.load(Ordering::Relaxed),
        }
    }
}
