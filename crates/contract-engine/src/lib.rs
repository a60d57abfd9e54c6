pub mod analysis;
pub mod config;
pub mod contract;
pub mod engine;
pub mod events;
pub mod metrics;

pub use analysis::{analyze_durations, AnalysisParams, DurationAnalysis, DurationStats};
pub use config::EngineConfig;
pub use contract::{compound_profit, Contract, ContractStatus, ContractView, GrowthRate, StartParams};
pub use engine::AccumulatorEngine;
pub use events::{ContractEvent, TickOutcome};
pub use metrics::EngineMetrics;

use ledger::LedgerError;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient balance: stake {requested:.2} exceeds available {available:.2}")]
    InsufficientBalance { requested: f64, available: f64 },

    #[error("contract {0} is already active")]
    ContractAlreadyActive(Uuid),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("unsupported growth rate {0}%, expected 1 to 5")]
    UnsupportedGrowthRate(u8),

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: Option<ContractStatus>,
        to: ContractStatus,
    },

    #[error("ledger error: {0}")]
    Ledger(LedgerError),
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance { requested, available } => {
                EngineError::InsufficientBalance { requested, available }
            }
            other => EngineError::Ledger(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
