use crate::{LedgerError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_INITIAL_BALANCE: f64 = 50_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    Debit,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMovement {
    pub kind: MovementKind,
    pub amount: f64,
    pub balance_after: f64,
    pub contract_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct LedgerState {
    balance: f64,
    movements: Vec<LedgerMovement>,
}

/// Mock cash account. The balance only moves through [`debit`](Self::debit)
/// and [`credit`](Self::credit), and never goes negative.
#[derive(Debug)]
pub struct AccountLedger {
    initial_balance: f64,
    state: RwLock<LedgerState>,
}

impl AccountLedger {
    pub fn new(initial_balance: f64) -> Result<Self> {
        if !initial_balance.is_finite() || initial_balance < 0.0 {
            return Err(LedgerError::InvalidAmount(initial_balance));
        }

        Ok(Self {
            initial_balance,
            state: RwLock::new(LedgerState {
                balance: initial_balance,
                movements: Vec::new(),
            }),
        })
    }

    #[inline]
    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    #[inline]
    pub fn balance(&self) -> f64 {
        self.state.read().balance
    }

    #[inline]
    pub fn debit(&self, amount: f64) -> Result<f64> {
        self.apply_debit(amount, None)
    }

    #[inline]
    pub fn debit_for(&self, contract_id: Uuid, amount: f64) -> Result<f64> {
        self.apply_debit(amount, Some(contract_id))
    }

    #[inline]
    pub fn credit(&self, amount: f64) -> Result<f64> {
        self.apply_credit(amount, None)
    }

    #[inline]
    pub fn credit_for(&self, contract_id: Uuid, amount: f64) -> Result<f64> {
        self.apply_credit(amount, Some(contract_id))
    }

    pub fn movements(&self) -> Vec<LedgerMovement> {
        self.state.read().movements.clone()
    }

    fn apply_debit(&self, amount: f64, contract_id: Option<Uuid>) -> Result<f64> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut state = self.state.write();
        if amount > state.balance {
            warn!("Debit of {:.2} rejected, balance is {:.2}", amount, state.balance);
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: state.balance,
            });
        }

        state.balance -= amount;
        let balance_after = state.balance;
        state.movements.push(LedgerMovement {
            kind: MovementKind::Debit,
            amount,
            balance_after,
            contract_id,
            timestamp: Utc::now(),
        });

        debug!("Debited {:.2}, balance now {:.2}", amount, balance_after);
        Ok(balance_after)
    }

    fn apply_credit(&self, amount: f64, contract_id: Option<Uuid>) -> Result<f64> {
        // zero credits are legal: a lost contract settles for nothing
        if !amount.is_finite() || amount < 0.0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut state = self.state.write();
        state.balance += amount;
        let balance_after = state.balance;
        state.movements.push(LedgerMovement {
            kind: MovementKind::Credit,
            amount,
            balance_after,
            contract_id,
            timestamp: Utc::now(),
        });

        debug!("Credited {:.2}, balance now {:.2}", amount, balance_after);
        Ok(balance_after)
    }
}

impl Default for AccountLedger {
    fn default() -> Self {
        Self {
            initial_balance: DEFAULT_INITIAL_BALANCE,
            state: RwLock::new(LedgerState {
                balance: DEFAULT_INITIAL_BALANCE,
                movements: Vec::new(),
            }),
        }
    }
}
