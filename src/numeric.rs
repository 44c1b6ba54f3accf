//! Fixed-scale decimal helpers for prices and amounts
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point drift
//! across thousands of incremental updates). Every value entering a book is
//! normalized to [`SCALE`] fractional digits with HALF_UP rounding.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::ParseError;

/// Number of fractional digits kept for prices and amounts.
pub const SCALE: u32 = 12;

/// Round to [`SCALE`] fractional digits, half away from zero.
pub fn normalize(value: Decimal) -> Decimal {
    value
        .round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// Parse a wire decimal (plain or scientific notation) and normalize it.
pub fn parse_decimal(raw: &str) -> Result<Decimal, ParseError> {
    let trimmed = raw.trim();
    let parsed = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ParseError::InvalidDecimal {
            value: raw.to_string(),
        })?;
    Ok(normalize(parsed))
}
