//! Listener contracts for market updates
//!
//! Callbacks run synchronously while the market lock is held, in
//! registration order. They receive the locked [`MarketData`] so a listener
//! can read consistent state without touching the lock again. A listener
//! must not call back into the same market's mutators.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::book::{Order, Side};
use crate::market::trades::Trade;
use crate::market::MarketData;

/// Receives order book level changes.
pub trait OrderBookListener: Send + Sync {
    fn on_order_added(&self, market: &MarketData, side: Side, order: &Order);

    fn on_order_updated(&self, market: &MarketData, side: Side, order: &Order);

    fn on_order_removed(&self, market: &MarketData, side: Side, price: Decimal);
}

/// Receives trades appended to the trade log.
pub trait TradeListener: Send + Sync {
    fn on_trade_added(&self, market: &MarketData, trade: &Trade);
}

/// Ordered set of listeners with identity by reference.
pub(crate) struct ListenerSet<L: ?Sized> {
    listeners: Vec<Arc<L>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Returns false if this exact listener is already registered.
    pub(crate) fn add(&mut self, listener: Arc<L>) -> bool {
        if self.position(&listener).is_some() {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Returns false if the listener was not registered.
    pub(crate) fn remove(&mut self, listener: &Arc<L>) -> bool {
        match self.position(listener) {
            Some(idx) => {
                self.listeners.remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<L>> {
        self.listeners.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    // Compare data pointers only; vtable pointers may differ for the same object.
    fn position(&self, listener: &Arc<L>) -> Option<usize> {
        let target = Arc::as_ptr(listener) as *const ();
        self.listeners
            .iter()
            .position(|l| Arc::as_ptr(l) as *const () == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Tag(&'static str);

    impl Named for Tag {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut set: ListenerSet<dyn Named> = ListenerSet::new();
        let a: Arc<dyn Named> = Arc::new(Tag("a"));
        assert!(set.add(a.clone()));
        assert!(!set.add(a.clone()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_identity_not_equality() {
        let mut set: ListenerSet<dyn Named> = ListenerSet::new();
        let a: Arc<dyn Named> = Arc::new(Tag("same"));
        let b: Arc<dyn Named> = Arc::new(Tag("same"));
        assert!(set.add(a.clone()));
        assert!(set.add(b.clone()));
        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert_eq!(set.iter().next().unwrap().name(), "same");
    }

    #[test]
    fn test_registration_order_kept() {
        let mut set: ListenerSet<dyn Named> = ListenerSet::new();
        for name in ["first", "second", "third"] {
            set.add(Arc::new(Tag(name)) as Arc<dyn Named>);
        }
        let names: Vec<_> = set.iter().map(|l| l.name().to_string()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
