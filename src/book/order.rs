//! Aggregated order information for a single price level

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::numeric::normalize;

/// Book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Resting buy interest
    Bid,
    /// Resting sell interest
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Best-first iteration order for this side.
    pub fn best_first_ascending(&self) -> bool {
        matches!(self, Side::Ask)
    }
}

/// One price level's accumulated volume and order count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub price: Decimal,
    /// Resting volume; a signed delta when passed to [`Book::add`](super::Book::add).
    pub amount: Decimal,
    /// Number of orders at this level, `None` when the exchange does not report it.
    pub count: Option<u32>,
}

impl Order {
    pub fn new(price: Decimal, amount: Decimal, count: Option<u32>) -> Self {
        Self {
            price: normalize(price),
            amount: normalize(amount),
            count,
        }
    }

    /// Fold a delta into this level. Returns true if the level is now empty.
    pub(crate) fn absorb(&mut self, delta: &Order) -> bool {
        self.amount = normalize(self.amount + delta.amount);
        self.count = merge_count(self.count, delta.count);
        self.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.amount <= Decimal::ZERO
    }
}

/// Combine a stored count with an incoming one.
///
/// An unknown stored count stays unknown. An unknown incoming count leaves
/// the stored count unchanged.
pub fn merge_count(stored: Option<u32>, incoming: Option<u32>) -> Option<u32> {
    match (stored, incoming) {
        (Some(stored), Some(incoming)) => Some(stored.saturating_add(incoming)),
        (Some(stored), None) => Some(stored),
        (None, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_count_rules() {
        assert_eq!(merge_count(Some(1), Some(1)), Some(2));
        assert_eq!(merge_count(Some(3), None), Some(3));
        assert_eq!(merge_count(None, Some(4)), None);
        assert_eq!(merge_count(None, None), None);
        assert_eq!(merge_count(Some(u32::MAX), Some(1)), Some(u32::MAX));
    }

    #[test]
    fn test_absorb_reports_empty() {
        let mut level = Order::new(Decimal::from(100), Decimal::from(2), Some(1));
        assert!(!level.absorb(&Order::new(Decimal::from(100), Decimal::from(-1), Some(1))));
        assert_eq!(level.amount, Decimal::ONE);
        assert!(level.absorb(&Order::new(Decimal::from(100), Decimal::from(-1), None)));
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert!(Side::Ask.best_first_ascending());
        assert!(!Side::Bid.best_first_ascending());
    }
}
