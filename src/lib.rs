//! # Accumulator simulator
//!
//! Accumulator contracts over synthetic volatility indices:
//! - tick-driven contract engine with compounding payout and tolerance bands
//! - mock account ledger and trade history
//! - reconnecting WebSocket tick feed and a local random-walk simulator
//! - Monte Carlo duration analysis

pub mod config;
pub mod session;
pub mod utils;

pub use contract_engine;
pub use feed_client;
pub use ledger;
pub use market_data;

pub use config::{AppConfig, SourceKind};
pub use session::{TickSource, TradingSession};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
