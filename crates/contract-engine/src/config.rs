use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};

pub const MAX_TICKS: u32 = 45;
pub const MAX_PAYOUT: f64 = 10_000.0;
pub const TICK_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Accepted ticks after which the contract closes as won.
    pub max_ticks: u32,
    /// Profit cap after which the contract closes as won.
    pub max_payout: f64,
    pub tick_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_ticks: MAX_TICKS,
            max_payout: MAX_PAYOUT,
            tick_interval_ms: TICK_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_ticks == 0 {
            return Err(EngineError::InvalidParameters("max_ticks must be greater than zero".to_string()));
        }
        if !self.max_payout.is_finite() || self.max_payout <= 0.0 {
            return Err(EngineError::InvalidParameters(format!(
                "max_payout must be positive, got {}",
                self.max_payout
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(EngineError::InvalidParameters("tick_interval_ms must be greater than zero".to_string()));
        }
        Ok(())
    }
}
