//! Fixed-point rendering of monetary values and tax rates.
//!
//! Amounts are always written with exactly two decimal places and rates with
//! exactly four, whatever scale the input `Decimal` carries, so `1500` and
//! `1500.00` render identically.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places for monetary amounts.
pub const MONEY_SCALE: u32 = 2;

/// Decimal places for tax rates.
pub const RATE_SCALE: u32 = 4;

/// Round to `scale` places, half away from zero.
pub fn round_to(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

/// Round a monetary amount to cents.
pub fn round_money(value: Decimal) -> Decimal {
    round_to(value, MONEY_SCALE)
}

/// Render an amount as `1500.00`.
pub fn format_money(value: Decimal) -> String {
    round_to(value, MONEY_SCALE).to_string()
}

/// Render a rate fraction as `0.0200`.
pub fn format_rate(value: Decimal) -> String {
    round_to(value, RATE_SCALE).to_string()
}
