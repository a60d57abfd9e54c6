//! JSON messages exchanged with the tick feed.

use crate::{FeedError, Result};
use market_data::{Candle, Tick};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryStyle {
    Candles,
    Ticks,
}

impl HistoryStyle {
    fn as_str(&self) -> &'static str {
        match self {
            HistoryStyle::Candles => "candles",
            HistoryStyle::Ticks => "ticks",
        }
    }
}

/// Which kind of outbound request a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Ticks,
    Candles,
    History,
    Forget,
}

impl RequestKind {
    /// Error replies echo the request's `msg_type`, which is `ticks_history`
    /// for both history styles.
    pub fn matches(&self, msg_type: &str) -> bool {
        match self {
            RequestKind::Ticks => matches!(msg_type, "tick" | "ticks"),
            RequestKind::Candles => matches!(msg_type, "candles" | "ticks_history"),
            RequestKind::History => matches!(msg_type, "history" | "ticks_history"),
            RequestKind::Forget => msg_type == "forget",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ticks {
        symbol: String,
    },
    TicksHistory {
        symbol: String,
        style: HistoryStyle,
        granularity: Option<u32>,
        count: u32,
    },
    Forget {
        subscription_id: String,
    },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Ticks { .. } => RequestKind::Ticks,
            Request::TicksHistory { style: HistoryStyle::Candles, .. } => RequestKind::Candles,
            Request::TicksHistory { style: HistoryStyle::Ticks, .. } => RequestKind::History,
            Request::Forget { .. } => RequestKind::Forget,
        }
    }

    pub fn encode(&self, req_id: u64) -> String {
        let value = match self {
            Request::Ticks { symbol } => json!({
                "ticks": symbol,
                "subscribe": 1,
                "req_id": req_id,
            }),
            Request::TicksHistory {
                symbol,
                style,
                granularity,
                count,
            } => {
                let mut value = json!({
                    "ticks_history": symbol,
                    "style": style.as_str(),
                    "count": count,
                    "end": "latest",
                    "adjust_start_time": 1,
                    "req_id": req_id,
                });
                if let Some(granularity) = granularity {
                    value["granularity"] = json!(granularity);
                }
                value
            }
            Request::Forget { subscription_id } => json!({
                "forget": subscription_id,
                "req_id": req_id,
            }),
        };
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Tick {
        subscription_id: Option<String>,
        tick: Tick,
    },
    Candles(Vec<Candle>),
    History {
        prices: Vec<f64>,
        times: Vec<i64>,
    },
    Forget {
        succeeded: bool,
    },
    Error {
        message: String,
        code: Option<String>,
    },
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub req_id: Option<u64>,
    pub msg_type: String,
    pub payload: Payload,
}

impl Inbound {
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error { .. })
    }

    pub fn subscription_id(&self) -> Option<&str> {
        match &self.payload {
            Payload::Tick { subscription_id, .. } => subscription_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    msg_type: Option<String>,
    #[serde(default)]
    req_id: Option<u64>,
    #[serde(default)]
    error: Option<RawError>,
    #[serde(default)]
    tick: Option<Tick>,
    #[serde(default)]
    subscription: Option<RawSubscription>,
    #[serde(default)]
    candles: Option<Vec<Candle>>,
    #[serde(default)]
    history: Option<RawHistory>,
    #[serde(default)]
    forget: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawHistory {
    #[serde(default)]
    prices: Vec<f64>,
    #[serde(default)]
    times: Vec<i64>,
}

pub fn decode(text: &str) -> Result<Inbound> {
    let raw: RawMessage = serde_json::from_str(text).map_err(|e| FeedError::Protocol(e.to_string()))?;
    let msg_type = raw.msg_type.unwrap_or_default();

    // an error body wins over whatever else the message carries
    let payload = if let Some(error) = raw.error {
        Payload::Error {
            message: error.message,
            code: error.code,
        }
    } else if let Some(tick) = raw.tick {
        Payload::Tick {
            subscription_id: raw.subscription.map(|s| s.id),
            tick,
        }
    } else if let Some(candles) = raw.candles {
        Payload::Candles(candles)
    } else if let Some(history) = raw.history {
        if history.prices.len() != history.times.len() {
            return Err(FeedError::Protocol(format!(
                "history has {} prices but {} times",
                history.prices.len(),
                history.times.len()
            )));
        }
        Payload::History {
            prices: history.prices,
            times: history.times,
        }
    } else if let Some(forget) = raw.forget {
        Payload::Forget {
            succeeded: forget.as_u64() == Some(1) || forget.as_bool() == Some(true),
        }
    } else {
        Payload::Other
    };

    Ok(Inbound {
        req_id: raw.req_id,
        msg_type,
        payload,
    })
}
