//! Configuration for handlers, markets and the snapshot timer
//!
//! All configs deserialize from JSON with per-field defaults, and are
//! validated before use so a malformed setup fails at construction time.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Configuration for one connection handler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Name used in log spans (usually the exchange name).
    pub name: String,
    /// Streaming endpoint url.
    pub url: String,
    /// Fixed delay before an automatic reconnect, in milliseconds.
    pub reconnect_backoff_ms: u64,
    /// Delay applied to an explicit `schedule_connect`, in milliseconds.
    pub connect_delay_ms: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            name: "exchange".to_string(),
            url: String::new(),
            reconnect_backoff_ms: 5_000,
            connect_delay_ms: 0,
        }
    }
}

impl HandlerConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        Ok(())
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }
}

/// Configuration for a single market.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Maximum number of trades kept in the trade log.
    pub max_trades: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self { max_trades: 10_000 }
    }
}

impl MarketConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_trades == 0 {
            return Err(ConfigError::ZeroCapacity { field: "max_trades" });
        }
        Ok(())
    }
}

/// Configuration for the periodic snapshot generator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Timer period in milliseconds.
    pub period_ms: u64,
    /// Maximum levels per side; `None` takes the full book.
    pub depth: Option<usize>,
    /// Most recent trades included per market.
    pub max_trades: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            period_ms: 1_000,
            depth: None,
            max_trades: 100,
        }
    }
}

impl SnapshotConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_ms == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}
