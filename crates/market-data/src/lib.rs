pub mod indicators;
pub mod simulator;
pub mod types;

pub use indicators::{predict_next_tick, BollingerBands, IndicatorSet, MacdValue, PredictedDirection, Prediction};
pub use simulator::PriceSimulator;
pub use types::*;

pub type Result<T> = std::result::Result<T, MarketDataError>;
