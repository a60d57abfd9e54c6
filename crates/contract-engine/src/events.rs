use crate::contract::ContractView;
use chrono::{DateTime, Utc};
use ledger::TradeRecord;
use serde::{Deserialize, Serialize};

/// What a single price did to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TickOutcome {
    /// No active contract.
    Ignored,
    /// Price was not a finite non-negative number; nothing changed.
    Rejected { price: f64 },
    Accepted { tick_count: u32, current_profit: f64 },
    Closed(TradeRecord),
}

impl TickOutcome {
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, TickOutcome::Closed(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContractEvent {
    Opened {
        contract: ContractView,
        timestamp: DateTime<Utc>,
    },
    Ticked {
        contract: ContractView,
        price: f64,
        timestamp: DateTime<Utc>,
    },
    Closed {
        record: TradeRecord,
        balance: f64,
        timestamp: DateTime<Utc>,
    },
}
