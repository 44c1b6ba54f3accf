//! Trade log for executed public trades
//!
//! Bounded history (oldest evicted first) with a per-market monotonic trade
//! sequence assigned on insertion.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::book::Side;
use crate::numeric::normalize;

/// A public trade as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange-issued trade identifier, if any.
    pub trade_id: Option<String>,
    /// Monotonic per-market sequence, assigned by the [`TradeLog`].
    pub sequence: u64,
    /// Execution time in Unix milliseconds.
    pub timestamp: i64,
    pub price: Decimal,
    /// Signed amount: positive when the buyer was the taker.
    pub amount: Decimal,
}

impl Trade {
    pub fn new(trade_id: Option<String>, timestamp: i64, price: Decimal, amount: Decimal) -> Self {
        Self {
            trade_id,
            sequence: 0,
            timestamp,
            price: normalize(price),
            amount: normalize(amount),
        }
    }

    /// Side of the taker: `Bid` for a buyer-initiated trade.
    pub fn taker_side(&self) -> Side {
        if self.amount >= Decimal::ZERO {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    /// Trade value (price × |amount|).
    pub fn value(&self) -> Decimal {
        self.price * self.amount.abs()
    }
}

/// Bounded trade history for one market.
#[derive(Debug, Clone)]
pub struct TradeLog {
    sequence_counter: u64,
    history: VecDeque<Trade>,
    max_history: usize,
}

impl TradeLog {
    pub fn new(max_history: usize) -> Self {
        Self {
            sequence_counter: 0,
            history: VecDeque::with_capacity(max_history.min(1024)),
            max_history,
        }
    }

    /// Append a trade, assigning its sequence. Returns the stored trade.
    pub fn record(&mut self, mut trade: Trade) -> &Trade {
        self.sequence_counter += 1;
        trade.sequence = self.sequence_counter;

        if self.history.len() >= self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(trade);
        &self.history[self.history.len() - 1]
    }

    /// Most recent trades, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Trade> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    /// All retained trades, oldest first.
    pub fn all(&self) -> Vec<Trade> {
        self.history.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&Trade> {
        self.history.back()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn current_sequence(&self) -> u64 {
        self.sequence_counter
    }

    /// Drop all trades. The sequence keeps counting.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(id: &str, amount: i64) -> Trade {
        Trade::new(
            Some(id.to_string()),
            1708123456789,
            Decimal::from(50000),
            Decimal::from(amount),
        )
    }

    #[test]
    fn test_record_assigns_sequence() {
        let mut log = TradeLog::new(10);
        assert_eq!(log.record(trade("a", 1)).sequence, 1);
        assert_eq!(log.record(trade("b", -1)).sequence, 2);
        assert_eq!(log.current_sequence(), 2);
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let mut log = TradeLog::new(3);
        for i in 0..5 {
            log.record(trade(&i.to_string(), 1));
        }
        assert_eq!(log.len(), 3);
        let ids: Vec<_> = log.all().into_iter().map(|t| t.trade_id.unwrap()).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_recent_newest_first() {
        let mut log = TradeLog::new(10);
        log.record(trade("a", 1));
        log.record(trade("b", 1));
        log.record(trade("c", 1));
        let recent = log.recent(2);
        assert_eq!(recent[0].trade_id.as_deref(), Some("c"));
        assert_eq!(recent[1].trade_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_clear_keeps_sequence() {
        let mut log = TradeLog::new(10);
        log.record(trade("a", 1));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.record(trade("b", 1)).sequence, 2);
    }

    #[test]
    fn test_taker_side_and_value() {
        let buy = trade("a", 2);
        let sell = trade("b", -2);
        assert_eq!(buy.taker_side(), Side::Bid);
        assert_eq!(sell.taker_side(), Side::Ask);
        assert_eq!(sell.value(), Decimal::from(100000));
    }
}
