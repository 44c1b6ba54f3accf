//! Property tests for the order book engine
//!
//! - Same-price deltas accumulate to their sum
//! - Levels disappear as soon as their amount reaches zero or below
//! - Ascending and descending price lists mirror each other
//! - Remove-then-add replaces a level exactly like a direct insert

use std::collections::BTreeMap;

use feed_aggregator::book::{Book, BookChange, Order, Side};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn amount(units: i64) -> Decimal {
    Decimal::new(units, 4)
}

/// Reference model: price → resting amount, positive only.
fn apply_model(model: &mut BTreeMap<i64, Decimal>, price: i64, delta: Decimal) {
    match model.get(&price).copied() {
        None if delta > Decimal::ZERO => {
            model.insert(price, delta);
        }
        None => {}
        Some(current) => {
            let next = current + delta;
            if next <= Decimal::ZERO {
                model.remove(&price);
            } else {
                model.insert(price, next);
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_same_price_deltas_sum(units in prop::collection::vec(1i64..1_000_000, 1..40)) {
        let mut book = Book::new(Side::Bid);
        let price = Decimal::from(50_000);
        for u in &units {
            book.add(Order::new(price, amount(*u), Some(1)));
        }

        let expected: Decimal = units.iter().map(|u| amount(*u)).sum();
        let level = book.order_for_price(&price).unwrap();
        prop_assert_eq!(level.amount, expected);
        prop_assert_eq!(level.count, Some(units.len() as u32));
        prop_assert_eq!(book.size(), 1);
    }

    #[test]
    fn prop_book_matches_model(
        ops in prop::collection::vec((0i64..20, -500_000i64..500_000), 1..200),
    ) {
        let mut book = Book::new(Side::Ask);
        let mut model = BTreeMap::new();

        for (price, units) in ops {
            let before = book.size();
            let change = book.add(Order::new(Decimal::from(price), amount(units), None));
            apply_model(&mut model, price, amount(units));

            if let BookChange::Removed(removed) = change {
                prop_assert!(book.order_for_price(&removed).is_none());
                prop_assert_eq!(book.size(), before - 1);
            }
        }

        prop_assert_eq!(book.size(), model.len());
        for (price, expected) in &model {
            let level = book.order_for_price(&Decimal::from(*price)).unwrap();
            prop_assert_eq!(level.amount, *expected);
        }
    }

    #[test]
    fn prop_ordered_prices_mirror(
        ops in prop::collection::vec((0i64..1_000, -100i64..1_000), 0..100),
    ) {
        let mut book = Book::new(Side::Bid);
        for (price, units) in ops {
            book.add(Order::new(Decimal::new(price, 2), Decimal::from(units), None));
        }

        let ascending = book.ordered_prices(true);
        let mut descending = book.ordered_prices(false);
        descending.reverse();
        prop_assert_eq!(&ascending, &descending);
        prop_assert_eq!(ascending.len(), book.size());
        for price in &ascending {
            prop_assert!(book.order_for_price(price).unwrap().amount > Decimal::ZERO);
        }
        prop_assert!(ascending.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_remove_then_add_equals_direct_set(
        levels in prop::collection::btree_map(1i64..500, 1i64..10_000, 1..30),
        target in 1i64..500,
        replacement in 1i64..10_000,
    ) {
        let mut replayed = Book::new(Side::Bid);
        let mut direct = Book::new(Side::Bid);
        for (price, units) in &levels {
            let order = Order::new(Decimal::from(*price), amount(*units), Some(1));
            replayed.add(order.clone());
            if *price != target {
                direct.add(order);
            }
        }

        let price = Decimal::from(target);
        replayed.remove(&price);
        replayed.add(Order::new(price, amount(replacement), Some(1)));
        direct.add(Order::new(price, amount(replacement), Some(1)));

        prop_assert_eq!(replayed, direct);
    }
}

#[test]
fn test_first_insert_non_positive_is_ignored() {
    let mut book = Book::new(Side::Ask);
    assert_eq!(
        book.add(Order::new(Decimal::from(10), Decimal::from(-1), None)),
        BookChange::Ignored
    );
    assert!(book.is_empty());
}
