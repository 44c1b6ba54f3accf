//! Error types for the aggregator core
//!
//! Configuration problems fail fast at construction time. Parse and
//! transport errors are recoverable and never escape the layer that
//! handles them; invalid lifecycle transitions are not errors at all.

use thiserror::Error;

/// Top-level error
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Market construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("{field} currency must not be empty")]
    EmptyCurrency { field: &'static str },
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("connection url must not be empty")]
    EmptyUrl,

    #[error("handler name must not be empty")]
    EmptyName,

    #[error("snapshot period must be greater than zero")]
    ZeroPeriod,

    #[error("{field} must be greater than zero")]
    ZeroCapacity { field: &'static str },

    #[error("invalid config document: {reason}")]
    Invalid { reason: String },

    #[error("connection handler must be spawned inside a tokio runtime")]
    NoRuntime,
}

/// Errors raised while interpreting a raw exchange frame.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    #[error("invalid decimal: {value}")]
    InvalidDecimal { value: String },

    #[error("unknown channel id: {id}")]
    UnknownChannel { id: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transport-level failure reported by or to the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct TransportError {
    pub reason: String,
}

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
