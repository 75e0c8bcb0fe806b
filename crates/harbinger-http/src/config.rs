//! HTTP fetcher configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`HttpFetcher`](crate::HttpFetcher)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout (ms)
    pub timeout_ms: u64,
    /// Connect timeout (ms)
    pub connect_timeout_ms: u64,
    /// Enable compression
    pub compression: bool,
    /// User agent
    pub user_agent: String,
    /// Headers sent with every request
    pub headers: Vec<(String, String)>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            compression: true,
            user_agent: format!("harbinger/{}", env!("CARGO_PKG_VERSION")),
            headers: vec![
                ("X-Requested-With".into(), "harbinger".into()),
                ("Accept".into(), "text/html, application/xhtml+xml".into()),
            ],
        }
    }
}

impl HttpConfig {
    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Add header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_timeout_keeps_millis() {
        let config = HttpConfig::default().with_timeout(Duration::from_secs(2));
        assert_eq!(config.timeout_ms, 2_000);
        assert_eq!(config.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_with_timeout_saturates_huge_durations() {
        let config = HttpConfig::default().with_timeout(Duration::MAX);
        assert_eq!(config.timeout_ms, u64::MAX);
    }
}
