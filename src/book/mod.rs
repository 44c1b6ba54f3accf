//! Per-side price-level book
//!
//! Maps price → aggregated [`Order`]. Uses `BTreeMap` for sorted, deterministic
//! iteration. All arithmetic uses `Decimal` normalized to a fixed scale.
//!
//! A single [`Book::add`] drives both update protocols seen on exchanges:
//! - signed deltas: `add(+x)` / `add(-x)` at a price
//! - total replace: `remove(price)` followed by `add(total)`
//!
//! A level is removed the moment its amount drops to zero or below.

pub mod order;

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::debug;

use crate::numeric::normalize;

pub use order::{merge_count, Order, Side};

/// Outcome of applying an order to a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookChange {
    /// A new price level was inserted.
    Added(Order),
    /// An existing level changed and is still positive; carries the new state.
    Updated(Order),
    /// The level dropped to zero or below and was deleted.
    Removed(Decimal),
    /// A non-positive amount arrived for a price with no level; nothing stored.
    Ignored,
}

/// Price levels for one side of one market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    side: Side,
    levels: BTreeMap<Decimal, Order>,
}

impl Book {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Insert a new level or fold `order` into the existing one.
    pub fn add(&mut self, order: Order) -> BookChange {
        // fields are public, so a hand-built order may be off-scale
        let order = Order::new(order.price, order.amount, order.count);
        let price = order.price;

        match self.levels.entry(price) {
            Entry::Vacant(slot) => {
                if order.is_empty() {
                    debug!(side = ?self.side, price = %price, amount = %order.amount, "Ignoring non-positive amount for absent level");
                    return BookChange::Ignored;
                }
                slot.insert(order.clone());
                BookChange::Added(order)
            }
            Entry::Occupied(mut slot) => {
                if slot.get_mut().absorb(&order) {
                    slot.remove();
                    BookChange::Removed(price)
                } else {
                    BookChange::Updated(slot.get().clone())
                }
            }
        }
    }

    /// Delete the level at `price` if present.
    pub fn remove(&mut self, price: &Decimal) -> Option<Order> {
        self.levels.remove(&normalize(*price))
    }

    /// Distinct prices, ascending or descending.
    pub fn ordered_prices(&self, ascending: bool) -> Vec<Decimal> {
        if ascending {
            self.levels.keys().copied().collect()
        } else {
            self.levels.keys().rev().copied().collect()
        }
    }

    pub fn order_for_price(&self, price: &Decimal) -> Option<&Order> {
        self.levels.get(price)
    }

    /// Number of distinct price levels.
    pub fn size(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Best level: highest bid or lowest ask.
    pub fn best(&self) -> Option<&Order> {
        match self.side {
            Side::Bid => self.levels.values().next_back(),
            Side::Ask => self.levels.values().next(),
        }
    }

    /// Levels best-first, limited to `depth` when given.
    pub fn levels(&self, depth: Option<usize>) -> Vec<Order> {
        let limit = depth.unwrap_or(usize::MAX);
        match self.side {
            Side::Bid => self.levels.values().rev().take(limit).cloned().collect(),
            Side::Ask => self.levels.values().take(limit).cloned().collect(),
        }
    }

    /// Sum of resting amounts across all levels.
    pub fn total_amount(&self) -> Decimal {
        self.levels.values().map(|o| o.amount).sum()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}
