//! Point-in-time snapshots of markets and exchanges
//!
//! Each market is read under its own lock, so a market snapshot is
//! self-consistent; an exchange snapshot is a sequence of such reads with
//! no ordering guarantee across markets. Snapshots are versioned and carry
//! a SHA-256 checksum of their levels for integrity checks downstream.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::book::Order;
use crate::config::SnapshotConfig;
use crate::error::AggregatorError;
use crate::exchange::Exchange;
use crate::market::{CurrencyPair, Market, MarketData, Trade};

/// A versioned, checksummed readout of one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub version: u64,
    pub pair: CurrencyPair,
    /// Best first (descending price).
    pub bids: Vec<Order>,
    /// Best first (ascending price).
    pub asks: Vec<Order>,
    /// Most recent trades, newest first.
    pub trades: Vec<Trade>,
    /// Market mutation sequence at capture time.
    pub last_sequence: u64,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub checksum: String,
}

impl MarketSnapshot {
    pub fn capture(data: &MarketData, depth: Option<usize>, max_trades: usize, version: u64, timestamp: i64) -> Self {
        let bids = data.bids().levels(depth);
        let asks = data.asks().levels(depth);
        let last_sequence = data.sequence();
        let checksum = compute_checksum(&bids, &asks, last_sequence);

        Self {
            version,
            pair: data.pair().clone(),
            bids,
            asks,
            trades: data.trades().recent(max_trades),
            last_sequence,
            timestamp,
            checksum,
        }
    }

    /// True if the checksum matches the levels and sequence.
    pub fn verify_integrity(&self) -> bool {
        self.checksum == compute_checksum(&self.bids, &self.asks, self.last_sequence)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Snapshots of every market on one exchange, in pair order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
    pub version: u64,
    pub exchange: String,
    pub markets: Vec<MarketSnapshot>,
    pub timestamp: i64,
}

impl ExchangeSnapshot {
    pub fn market(&self, pair: &CurrencyPair) -> Option<&MarketSnapshot> {
        self.markets.iter().find(|m| &m.pair == pair)
    }

    pub fn verify_integrity(&self) -> bool {
        self.markets.iter().all(MarketSnapshot::verify_integrity)
    }
}

/// What a [`SnapshotListener`] receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Snapshot {
    Exchange(ExchangeSnapshot),
    Market(MarketSnapshot),
}

impl Snapshot {
    pub fn version(&self) -> u64 {
        match self {
            Snapshot::Exchange(s) => s.version,
            Snapshot::Market(s) => s.version,
        }
    }

    pub fn verify_integrity(&self) -> bool {
        match self {
            Snapshot::Exchange(s) => s.verify_integrity(),
            Snapshot::Market(s) => s.verify_integrity(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What gets snapshotted.
#[derive(Debug, Clone)]
pub enum SnapshotSource {
    Exchange(Arc<Exchange>),
    Market(Arc<Market>),
}

/// Receives periodic snapshots on the timer task. Must return quickly.
pub trait SnapshotListener: Send + Sync {
    fn on_snapshot(&self, snapshot: &Snapshot);
}

/// Builds versioned snapshots from a source.
#[derive(Debug)]
pub struct SnapshotBuilder {
    version_counter: u64,
    depth: Option<usize>,
    max_trades: usize,
}

impl SnapshotBuilder {
    pub fn new(config: &SnapshotConfig) -> Self {
        Self {
            version_counter: 0,
            depth: config.depth,
            max_trades: config.max_trades,
        }
    }

    /// `None` if a market read was abandoned on a poisoned lock.
    pub fn build_market(&mut self, market: &Market, timestamp: i64) -> Option<MarketSnapshot> {
        let version = self.version_counter + 1;
        let snapshot = market.with_data(|data| MarketSnapshot::capture(data, self.depth, self.max_trades, version, timestamp))?;
        self.version_counter = version;
        Some(snapshot)
    }

    /// Markets whose read was abandoned are left out.
    pub fn build_exchange(&mut self, exchange: &Exchange, timestamp: i64) -> ExchangeSnapshot {
        self.version_counter += 1;
        let version = self.version_counter;
        let markets = exchange
            .markets()
            .iter()
            .filter_map(|market| {
                market.with_data(|data| MarketSnapshot::capture(data, self.depth, self.max_trades, version, timestamp))
            })
            .collect();

        ExchangeSnapshot {
            version,
            exchange: exchange.name().to_string(),
            markets,
            timestamp,
        }
    }

    pub fn build(&mut self, source: &SnapshotSource, timestamp: i64) -> Option<Snapshot> {
        match source {
            SnapshotSource::Exchange(exchange) => Some(Snapshot::Exchange(self.build_exchange(exchange, timestamp))),
            SnapshotSource::Market(market) => self.build_market(market, timestamp).map(Snapshot::Market),
        }
    }

    pub fn current_version(&self) -> u64 {
        self.version_counter
    }
}

/// Periodic snapshot timer. Stops on [`stop`](Self::stop) or drop.
#[derive(Debug)]
pub struct SnapshotGenerator {
    task: JoinHandle<()>,
}

impl SnapshotGenerator {
    /// Start pushing snapshots of `source` to `listener` every period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        source: SnapshotSource,
        listener: Arc<dyn SnapshotListener>,
        config: SnapshotConfig,
    ) -> Result<Self, AggregatorError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| crate::error::ConfigError::NoRuntime)?;

        let period = config.period();
        let mut builder = SnapshotBuilder::new(&config);
        info!(period_ms = config.period_ms, depth = ?config.depth, "Snapshot generator started");

        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match builder.build(&source, now_ms()) {
                    Some(snapshot) => {
                        debug!(version = snapshot.version(), "Snapshot built");
                        listener.on_snapshot(&snapshot);
                    }
                    None => warn!("Snapshot skipped; market read abandoned"),
                }
            }
        });

        Ok(Self { task })
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SnapshotGenerator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// SHA-256 over best-first levels and the sequence.
pub fn compute_checksum(bids: &[Order], asks: &[Order], sequence: u64) -> String {
    let mut hasher = Sha256::new();

    for side in [bids, asks] {
        for level in side {
            hasher.update(level.price.to_string().as_bytes());
            hasher.update(b":");
            hasher.update(level.amount.to_string().as_bytes());
            hasher.update(b":");
            match level.count {
                Some(count) => hasher.update(count.to_string().as_bytes()),
                None => hasher.update(b"-"),
            }
            hasher.update(b"|");
        }
        hasher.update(b"---");
    }

    hasher.update(sequence.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
