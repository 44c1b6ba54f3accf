//! Collection of markets for one exchange, unique per currency pair

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::MarketConfig;
use crate::error::{AggregatorError, MarketError};
use crate::market::{CurrencyPair, Market};

/// An exchange and the markets subscribed on it.
#[derive(Debug)]
pub struct Exchange {
    name: String,
    market_config: MarketConfig,
    markets: Mutex<BTreeMap<CurrencyPair, Arc<Market>>>,
}

impl Exchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            market_config: MarketConfig::default(),
            markets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Create an exchange whose markets use `market_config`.
    pub fn with_market_config(name: impl Into<String>, market_config: MarketConfig) -> Result<Self, AggregatorError> {
        market_config.validate()?;
        Ok(Self {
            market_config,
            ..Self::new(name)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the market for (base, quote), creating it on first use.
    pub fn market(&self, base: &str, quote: &str) -> Result<Arc<Market>, MarketError> {
        let pair = CurrencyPair::new(base, quote)?;
        let mut markets = match self.markets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(exchange = %self.name, "Market registry lock poisoned; recovering");
                poisoned.into_inner()
            }
        };

        let market = markets.entry(pair.clone()).or_insert_with(|| {
            info!(exchange = %self.name, market = %pair, "Market created");
            Arc::new(Market::from_pair(pair, self.market_config.clone()))
        });
        Ok(Arc::clone(market))
    }

    /// Look up an existing market.
    pub fn get(&self, pair: &CurrencyPair) -> Option<Arc<Market>> {
        self.markets.lock().ok()?.get(pair).cloned()
    }

    /// All markets in pair order.
    pub fn markets(&self) -> Vec<Arc<Market>> {
        self.markets
            .lock()
            .map(|markets| markets.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn market_count(&self) -> usize {
        self.markets.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Clear books and trades of every market; markets stay registered.
    pub fn clear_all(&self) {
        for market in self.markets() {
            market.clear_data();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_market_unique_per_pair() {
        let exchange = Exchange::new("bitfinex");
        let a = exchange.market("btc", "usd").unwrap();
        let b = exchange.market("BTC", "USD").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(exchange.market_count(), 1);

        exchange.market("ETH", "USD").unwrap();
        assert_eq!(exchange.market_count(), 2);
    }

    #[test]
    fn test_markets_sorted_by_pair() {
        let exchange = Exchange::new("kraken");
        exchange.market("XRP", "USD").unwrap();
        exchange.market("BTC", "USD").unwrap();
        let names: Vec<_> = exchange.markets().iter().map(|m| m.pair().to_string()).collect();
        assert_eq!(names, vec!["BTC/USD", "XRP/USD"]);
    }

    #[test]
    fn test_invalid_pair_rejected() {
        let exchange = Exchange::new("kraken");
        assert!(exchange.market("", "USD").is_err());
        assert_eq!(exchange.market_count(), 0);
    }

    #[test]
    fn test_clear_all_keeps_markets() {
        let exchange = Exchange::new("kraken");
        let market = exchange.market("BTC", "USD").unwrap();
        market.add_bid(Decimal::from(100), Decimal::ONE, None);
        exchange.clear_all();
        assert_eq!(market.bid_depth(), 0);
        assert!(exchange.get(market.pair()).is_some());
    }

    #[test]
    fn test_markets_inherit_config() {
        let exchange = Exchange::with_market_config("kraken", MarketConfig { max_trades: 1 }).unwrap();
        let market = exchange.market("BTC", "USD").unwrap();
        for ts in 0..3 {
            market.add_trade(crate::market::Trade::new(None, ts, Decimal::ONE, Decimal::ONE));
        }
        assert_eq!(market.with_data(|d| d.trades().len()), Some(1));
    }
}
