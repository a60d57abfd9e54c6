pub mod client;
pub mod config;
pub mod protocol;

pub use client::{FeedEvent, PriceFeedClient, Subscription};
pub use config::FeedConfig;
pub use protocol::{HistoryStyle, Inbound, Payload, Request, RequestKind};

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("connection failed after {attempts} attempts: {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    #[error("feed rejected request: {message}")]
    SubscriptionError { message: String, code: Option<String> },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid feed configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, FeedError>;
