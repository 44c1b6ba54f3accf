//! Per-market aggregate: bid and ask books, trade log, listener fan-out
//!
//! Every mutation on one [`Market`] is linearized by a single exclusive lock.
//! Listener callbacks fire inside that lock, in registration order, so each
//! listener observes the state produced by exactly the update it is told
//! about.
//!
//! A poisoned lock (a listener panicked mid-callback) abandons the current
//! operation without notifying anyone; the poison is cleared so later
//! operations proceed normally.

pub mod listener;
pub mod trades;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::book::{Book, BookChange, Order, Side};
use crate::config::{MarketConfig, SnapshotConfig};
use crate::error::{AggregatorError, MarketError};
use crate::snapshot::{now_ms, MarketSnapshot};

pub use listener::{OrderBookListener, TradeListener};
pub use trades::{Trade, TradeLog};

use listener::ListenerSet;

/// Traded currency pair, both legs non-empty and uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CurrencyPair {
    base: String,
    quote: String,
}

impl CurrencyPair {
    pub fn new(base: &str, quote: &str) -> Result<Self, MarketError> {
        let base = base.trim();
        let quote = quote.trim();
        if base.is_empty() {
            return Err(MarketError::EmptyCurrency { field: "base" });
        }
        if quote.is_empty() {
            return Err(MarketError::EmptyCurrency { field: "quote" });
        }
        Ok(Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// The state guarded by a market's lock.
#[derive(Debug, Clone)]
pub struct MarketData {
    pair: CurrencyPair,
    bids: Book,
    asks: Book,
    trades: TradeLog,
    /// Count of applied mutations.
    sequence: u64,
}

impl MarketData {
    fn new(pair: CurrencyPair, max_trades: usize) -> Self {
        Self {
            pair,
            bids: Book::new(Side::Bid),
            asks: Book::new(Side::Ask),
            trades: TradeLog::new(max_trades),
            sequence: 0,
        }
    }

    pub fn pair(&self) -> &CurrencyPair {
        &self.pair
    }

    pub fn bids(&self) -> &Book {
        &self.bids
    }

    pub fn asks(&self) -> &Book {
        &self.asks
    }

    pub fn book(&self, side: Side) -> &Book {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn book_mut(&mut self, side: Side) -> &mut Book {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    pub fn trades(&self) -> &TradeLog {
        &self.trades
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn best_bid(&self) -> Option<&Order> {
        self.bids.best()
    }

    pub fn best_ask(&self) -> Option<&Order> {
        self.asks.best()
    }

    /// Best ask minus best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Average of best bid and best ask.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2)),
            _ => None,
        }
    }
}

struct MarketState {
    data: MarketData,
    book_listeners: ListenerSet<dyn OrderBookListener>,
    trade_listeners: ListenerSet<dyn TradeListener>,
}

/// One traded pair's books, trades and listeners behind a single lock.
pub struct Market {
    pair: CurrencyPair,
    state: Mutex<MarketState>,
}

impl fmt::Debug for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Market").field("pair", &self.pair).finish()
    }
}

impl Market {
    pub fn new(base: &str, quote: &str) -> Result<Self, MarketError> {
        let pair = CurrencyPair::new(base, quote)?;
        Ok(Self::from_pair(pair, MarketConfig::default()))
    }

    pub fn with_config(base: &str, quote: &str, config: MarketConfig) -> Result<Self, AggregatorError> {
        config.validate()?;
        let pair = CurrencyPair::new(base, quote)?;
        Ok(Self::from_pair(pair, config))
    }

    pub(crate) fn from_pair(pair: CurrencyPair, config: MarketConfig) -> Self {
        Self {
            state: Mutex::new(MarketState {
                data: MarketData::new(pair.clone(), config.max_trades),
                book_listeners: ListenerSet::new(),
                trade_listeners: ListenerSet::new(),
            }),
            pair,
        }
    }

    pub fn pair(&self) -> &CurrencyPair {
        &self.pair
    }

    pub fn add_bid(&self, price: Decimal, amount: Decimal, count: Option<u32>) -> Option<BookChange> {
        self.add_order(Side::Bid, Order::new(price, amount, count))
    }

    pub fn add_ask(&self, price: Decimal, amount: Decimal, count: Option<u32>) -> Option<BookChange> {
        self.add_order(Side::Ask, Order::new(price, amount, count))
    }

    /// Apply `order` to one side and notify listeners.
    ///
    /// Returns `None` if the operation was abandoned on a poisoned lock.
    pub fn add_order(&self, side: Side, order: Order) -> Option<BookChange> {
        let mut guard = self.lock("add_order")?;
        let state = &mut *guard;

        let change = state.data.book_mut(side).add(order);
        if change != BookChange::Ignored {
            state.data.sequence += 1;
        }
        debug!(market = %self.pair, side = ?side, change = ?change, "Applied order");

        let data = &state.data;
        for listener in state.book_listeners.iter() {
            match &change {
                BookChange::Added(order) => listener.on_order_added(data, side, order),
                BookChange::Updated(order) => listener.on_order_updated(data, side, order),
                BookChange::Removed(price) => listener.on_order_removed(data, side, *price),
                BookChange::Ignored => {}
            }
        }
        Some(change)
    }

    pub fn remove_bid(&self, price: Decimal) {
        self.remove_order(Side::Bid, price);
    }

    pub fn remove_ask(&self, price: Decimal) {
        self.remove_order(Side::Ask, price);
    }

    /// Delete a level. Listeners are told about the removal even if the
    /// level was already gone.
    pub fn remove_order(&self, side: Side, price: Decimal) {
        let Some(mut guard) = self.lock("remove_order") else {
            return;
        };
        let state = &mut *guard;

        let price = crate::numeric::normalize(price);
        if state.data.book_mut(side).remove(&price).is_some() {
            state.data.sequence += 1;
        }
        debug!(market = %self.pair, side = ?side, price = %price, "Removed level");

        for listener in state.book_listeners.iter() {
            listener.on_order_removed(&state.data, side, price);
        }
    }

    /// Append a trade and notify trade listeners.
    pub fn add_trade(&self, trade: Trade) {
        let Some(mut guard) = self.lock("add_trade") else {
            return;
        };
        let state = &mut *guard;

        state.data.sequence += 1;
        let trade = state.data.trades.record(trade).clone();
        debug!(market = %self.pair, sequence = trade.sequence, price = %trade.price, amount = %trade.amount, "Recorded trade");

        for listener in state.trade_listeners.iter() {
            listener.on_trade_added(&state.data, &trade);
        }
    }

    /// Drop all price levels on both sides.
    pub fn clear_order_book(&self) {
        if let Some(mut state) = self.lock("clear_order_book") {
            state.data.bids.clear();
            state.data.asks.clear();
            state.data.sequence += 1;
            debug!(market = %self.pair, "Cleared order book");
        }
    }

    pub fn clear_trades(&self) {
        if let Some(mut state) = self.lock("clear_trades") {
            state.data.trades.clear();
            state.data.sequence += 1;
            debug!(market = %self.pair, "Cleared trades");
        }
    }

    /// Drop levels and trades in one critical section.
    pub fn clear_data(&self) {
        if let Some(mut state) = self.lock("clear_data") {
            state.data.bids.clear();
            state.data.asks.clear();
            state.data.trades.clear();
            state.data.sequence += 1;
            debug!(market = %self.pair, "Cleared market data");
        }
    }

    pub fn best_bid(&self) -> Option<Order> {
        self.with_data(|data| data.best_bid().cloned()).flatten()
    }

    pub fn best_ask(&self) -> Option<Order> {
        self.with_data(|data| data.best_ask().cloned()).flatten()
    }

    pub fn spread(&self) -> Option<Decimal> {
        self.with_data(MarketData::spread).flatten()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        self.with_data(MarketData::mid_price).flatten()
    }

    pub fn bid_depth(&self) -> usize {
        self.with_data(|data| data.bids.size()).unwrap_or(0)
    }

    pub fn ask_depth(&self) -> usize {
        self.with_data(|data| data.asks.size()).unwrap_or(0)
    }

    /// Most recent trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Vec<Trade> {
        self.with_data(|data| data.trades.recent(limit)).unwrap_or_default()
    }

    /// Consistent readout of this market, shaped by `config`.
    ///
    /// Carries version 0: ad-hoc snapshots sit outside any
    /// [`SnapshotBuilder`](crate::snapshot::SnapshotBuilder) sequence.
    pub fn snapshot(&self, config: &SnapshotConfig) -> Option<MarketSnapshot> {
        self.with_data(|data| MarketSnapshot::capture(data, config.depth, config.max_trades, 0, now_ms()))
    }

    /// Run `f` against the locked state for a consistent multi-field read.
    pub fn with_data<R>(&self, f: impl FnOnce(&MarketData) -> R) -> Option<R> {
        let state = self.lock("with_data")?;
        Some(f(&state.data))
    }

    pub fn add_order_book_listener(&self, listener: Arc<dyn OrderBookListener>) -> bool {
        self.lock("add_order_book_listener")
            .is_some_and(|mut state| state.book_listeners.add(listener))
    }

    pub fn remove_order_book_listener(&self, listener: &Arc<dyn OrderBookListener>) -> bool {
        self.lock("remove_order_book_listener")
            .is_some_and(|mut state| state.book_listeners.remove(listener))
    }

    pub fn add_trade_listener(&self, listener: Arc<dyn TradeListener>) -> bool {
        self.lock("add_trade_listener")
            .is_some_and(|mut state| state.trade_listeners.add(listener))
    }

    pub fn remove_trade_listener(&self, listener: &Arc<dyn TradeListener>) -> bool {
        self.lock("remove_trade_listener")
            .is_some_and(|mut state| state.trade_listeners.remove(listener))
    }

    pub fn listener_counts(&self) -> (usize, usize) {
        self.lock("listener_counts")
            .map(|state| (state.book_listeners.len(), state.trade_listeners.len()))
            .unwrap_or((0, 0))
    }

    fn lock(&self, op: &'static str) -> Option<MutexGuard<'_, MarketState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(poisoned) => {
                drop(poisoned);
                self.state.clear_poison();
                warn!(market = %self.pair, op, "Market lock poisoned; operation abandoned");
                None
            }
        }
    }
}
