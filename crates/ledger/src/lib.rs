pub mod account;
pub mod history;

pub use account::{AccountLedger, LedgerMovement, MovementKind, DEFAULT_INITIAL_BALANCE};
pub use history::{CloseReason, HistorySummary, TradeHistoryStore, TradeOutcome, TradeRecord};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("insufficient balance: requested {requested:.2}, available {available:.2}")]
    InsufficientBalance { requested: f64, available: f64 },
    #[error("invalid amount: {0}")]
    InvalidAmount(f64),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
