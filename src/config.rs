//! Application configuration: defaults, then an optional TOML file, then
//! `ACCUMULATOR__SECTION__KEY` environment overrides.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use contract_engine::{EngineConfig, GrowthRate};
use feed_client::FeedConfig;
use ledger::DEFAULT_INITIAL_BALANCE;
use market_data::Market;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_PREFIX: &str = "ACCUMULATOR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Simulated,
    Live,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub initial_price: f64,
    /// Overrides the market's own volatility when set.
    pub volatility: Option<f64>,
    pub trend: f64,
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            initial_price: 1_000.0,
            volatility: None,
            trend: 0.0,
            seed: None,
        }
    }
}

impl SimulatorConfig {
    pub fn volatility_for(&self, market: Market) -> f64 {
        self.volatility.unwrap_or_else(|| market.simulated_volatility())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub initial_balance: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: DEFAULT_INITIAL_BALANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub market: Market,
    pub stake: f64,
    pub growth_rate: GrowthRate,
    pub take_profit: Option<f64>,
    pub source: SourceKind,
    /// Contracts the demo binary runs back to back.
    pub trades: u32,
    pub analysis_trials: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            market: Market::V25,
            stake: 100.0,
            growth_rate: GrowthRate::ALL[2],
            take_profit: None,
            source: SourceKind::Simulated,
            trades: 3,
            analysis_trials: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub feed: FeedConfig,
    pub simulator: SimulatorConfig,
    pub ledger: LedgerConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).context("Failed to seed configuration defaults")?);

        if let Some(path) = path {
            let name = path
                .to_str()
                .with_context(|| format!("Config path {} is not valid UTF-8", path.display()))?;
            builder = builder.add_source(File::new(name, FileFormat::Toml).required(true));
        }

        let config: AppConfig = builder
            .add_source(Environment::with_prefix(prefix).separator("__").try_parsing(true))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate().context("Invalid engine configuration")?;
        self.feed.validate().context("Invalid feed configuration")?;

        if !self.ledger.initial_balance.is_finite() || self.ledger.initial_balance <= 0.0 {
            bail!("initial balance must be positive, got {}", self.ledger.initial_balance);
        }
        if !self.simulator.initial_price.is_finite() || self.simulator.initial_price <= 0.0 {
            bail!("simulator initial price must be positive, got {}", self.simulator.initial_price);
        }
        if let Some(volatility) = self.simulator.volatility {
            if !volatility.is_finite() || volatility < 0.0 {
                bail!("simulator volatility must be non-negative, got {}", volatility);
            }
        }
        if !self.simulator.trend.is_finite() {
            bail!("simulator trend must be finite");
        }
        if !self.session.stake.is_finite() || self.session.stake <= 0.0 {
            bail!("stake must be positive, got {}", self.session.stake);
        }
        if self.session.trades == 0 || self.session.analysis_trials == 0 {
            bail!("trades and analysis_trials must be at least 1");
        }
        Ok(())
    }
}
