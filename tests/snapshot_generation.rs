//! Periodic snapshot generation
//!
//! Runs the generator on a paused clock and checks period, versioning,
//! integrity and stop behaviour.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use feed_aggregator::exchange::Exchange;
use feed_aggregator::market::Market;
use feed_aggregator::snapshot::{Snapshot, SnapshotGenerator, SnapshotListener, SnapshotSource};
use feed_aggregator::{AggregatorError, ConfigError, SnapshotConfig};
use rust_decimal::Decimal;

#[derive(Default)]
struct Collector {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl Collector {
    fn taken(&self) -> Vec<Snapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

impl SnapshotListener for Collector {
    fn on_snapshot(&self, snapshot: &Snapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}

fn config(period_ms: u64) -> SnapshotConfig {
    SnapshotConfig {
        period_ms,
        ..SnapshotConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_market_snapshots_every_period() {
    let market = Arc::new(Market::new("BTC", "USD").unwrap());
    market.add_bid(Decimal::from(100), Decimal::ONE, Some(1));
    let collector = Arc::new(Collector::default());

    let generator = SnapshotGenerator::spawn(SnapshotSource::Market(market.clone()), collector.clone(), config(1_000)).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(collector.taken().is_empty());

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    market.add_ask(Decimal::from(101), Decimal::ONE, Some(1));
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let taken = collector.taken();
    assert_eq!(taken.len(), 2);
    assert_eq!(taken[0].version(), 1);
    assert_eq!(taken[1].version(), 2);
    assert!(taken.iter().all(Snapshot::verify_integrity));

    match (&taken[0], &taken[1]) {
        (Snapshot::Market(first), Snapshot::Market(second)) => {
            assert!(first.asks.is_empty());
            assert_eq!(second.asks.len(), 1);
            assert!(second.last_sequence > first.last_sequence);
        }
        other => panic!("unexpected snapshots {other:?}"),
    }
    generator.stop();
}

#[tokio::test(start_paused = true)]
async fn test_exchange_snapshot_covers_all_markets() {
    let exchange = Arc::new(Exchange::new("bitfinex"));
    exchange.market("BTC", "USD").unwrap();
    exchange.market("ETH", "USD").unwrap();
    let collector = Arc::new(Collector::default());

    let _generator = SnapshotGenerator::spawn(SnapshotSource::Exchange(exchange), collector.clone(), config(250)).unwrap();
    tokio::time::sleep(Duration::from_millis(260)).await;

    let taken = collector.taken();
    assert_eq!(taken.len(), 1);
    match &taken[0] {
        Snapshot::Exchange(snap) => {
            assert_eq!(snap.exchange, "bitfinex");
            assert_eq!(snap.markets.len(), 2);
        }
        other => panic!("expected exchange snapshot, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_drop_end_the_timer() {
    let market = Arc::new(Market::new("BTC", "USD").unwrap());
    let collector = Arc::new(Collector::default());

    let generator = SnapshotGenerator::spawn(SnapshotSource::Market(market.clone()), collector.clone(), config(100)).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    generator.stop();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(collector.taken().len(), 1);
    assert!(generator.is_stopped());

    let dropped = Arc::new(Collector::default());
    drop(SnapshotGenerator::spawn(SnapshotSource::Market(market), dropped.clone(), config(100)).unwrap());
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert!(dropped.taken().is_empty());
}

#[tokio::test]
async fn test_zero_period_rejected() {
    let market = Arc::new(Market::new("BTC", "USD").unwrap());
    let err = SnapshotGenerator::spawn(SnapshotSource::Market(market), Arc::new(Collector::default()), config(0)).unwrap_err();
    assert!(matches!(err, AggregatorError::Config(ConfigError::ZeroPeriod)));
}
