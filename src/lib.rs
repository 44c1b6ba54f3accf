//! Feed Aggregator
//!
//! Ingestion core of a live multi-exchange market-data aggregator:
//! - Per-side order books with fixed-scale decimal price levels
//! - Per-market aggregate (books + bounded trade log) behind one lock,
//!   with synchronous listener fan-out
//! - Connection handler state machine with a single-slot action queue and
//!   automatic reconnect
//! - Subscription registry correlating exchange ids with (market, channel)
//! - Periodic checksummed snapshots
//!
//! Exchange wire formats and sockets stay outside: they plug in through
//! the [`Parser`](connection::Parser) and [`Transport`](connection::Transport)
//! traits.
//!
//! # Architecture
//!
//! ```text
//!   Transport (external)
//!        │ frames / open / close / error
//!   ┌────▼─────────────┐
//!   │ConnectionHandler │  ← lifecycle, subscriptions, reconnect
//!   └────┬─────────────┘
//!        │
//!   ┌────▼───┐
//!   │ Parser │  ← per exchange (external)
//!   └────┬───┘
//!        │ add_bid / add_ask / add_trade
//!   ┌────▼───────────────────┐
//!   │ Market (lock)          │
//!   │  bids Book │ asks Book │──► OrderBookListener / TradeListener
//!   │  TradeLog              │
//!   └────┬───────────────────┘
//!        │
//!   ┌────▼──────────────┐
//!   │ SnapshotGenerator │──► SnapshotListener
//!   └───────────────────┘
//! ```

pub mod book;
pub mod config;
pub mod connection;
pub mod error;
pub mod exchange;
pub mod market;
pub mod numeric;
pub mod snapshot;
pub mod subscription;

pub use book::{Book, BookChange, Order, Side};
pub use config::{HandlerConfig, MarketConfig, SnapshotConfig};
pub use connection::{ConnectionEvents, ConnectionHandle, ConnectionHandler, ConnectionState, Parser, Session, Transport};
pub use error::{AggregatorError, ConfigError, MarketError, ParseError, TransportError};
pub use exchange::Exchange;
pub use market::{CurrencyPair, Market, MarketData, OrderBookListener, Trade, TradeListener};
pub use snapshot::{Snapshot, SnapshotGenerator, SnapshotListener, SnapshotSource};
pub use subscription::{Channel, Resolution, Subscription, SubscriptionId, SubscriptionRegistry, SubscriptionState};

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
