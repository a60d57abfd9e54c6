use crate::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "wss://ws.binaryws.com/websockets/v3";
pub const DEFAULT_APP_ID: u32 = 65574;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub endpoint: String,
    pub app_id: u32,
    /// Total connection attempts before giving up.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub websocket_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            app_id: DEFAULT_APP_ID,
            max_retries: 3,
            retry_delay_ms: 1_000,
            websocket_timeout_ms: 20_000,
            request_timeout_ms: 20_000,
        }
    }
}

impl FeedConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn connection_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| FeedError::InvalidConfig(format!("{}: {}", self.endpoint, e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(FeedError::InvalidConfig(format!("unsupported scheme {}", other))),
        }
        url.query_pairs_mut().append_pair("app_id", &self.app_id.to_string());
        Ok(url)
    }

    /// Backoff before the attempt following failed attempt `attempt` (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }

    #[inline]
    pub fn websocket_timeout(&self) -> Duration {
        Duration::from_millis(self.websocket_timeout_ms)
    }

    #[inline]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.connection_url()?;
        if self.max_retries == 0 {
            return Err(FeedError::InvalidConfig("max_retries must be at least 1".to_string()));
        }
        if self.websocket_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(FeedError::InvalidConfig("timeouts must be greater than zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url_carries_app_id() {
        let url = FeedConfig::default().connection_url().unwrap();
        assert_eq!(url.host_str(), Some("ws.binaryws.com"));
        assert_eq!(url.query(), Some("app_id=65574"));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = FeedConfig::default();
        assert_eq!(config.retry_delay(0), Duration::from_millis(1_000));
        assert_eq!(config.retry_delay(1), Duration::from_millis(2_000));
        assert_eq!(config.retry_delay(2), Duration::from_millis(4_000));
    }

    #[test]
    fn test_validate() {
        assert!(FeedConfig::default().validate().is_ok());
        assert!(FeedConfig::with_endpoint("https://example.com").validate().is_err());
        assert!(FeedConfig::with_endpoint("not a url").validate().is_err());
        let config = FeedConfig {
            max_retries: 0,
            ..FeedConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
