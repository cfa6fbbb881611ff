use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Share of the held volume offered when closing, leaves room for fee rounding
pub const SELL_VOLUME_RATIO: f64 = 0.999;

const MAX_SCALE: u32 = 28;

/// Truncate `value` toward zero to `precision` decimals.
///
/// Works on the decimal representation, so `float_trunc(0.29, 2)` stays 0.29.
pub fn float_trunc(value: f64, precision: u32) -> f64 {
    let precision = precision.min(MAX_SCALE);
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(precision, RoundingStrategy::ToZero))
        .and_then(|d| d.to_f64())
        .unwrap_or_else(|| {
            let factor = 10f64.powi(precision as i32);
            (value * factor).trunc() / factor
        })
}

/// Decimals allowed by an exchange step size such as `"0.00100000"`.
///
/// Steps of one or more whole units give precision 0.
pub fn lot_precision_from_step(step_size: &str) -> Option<u32> {
    let step = Decimal::from_str(step_size.trim()).ok()?;
    if step <= Decimal::ZERO {
        return None;
    }
    Some(step.normalize().scale())
}

/// Quote-funded order size, truncated to the lot precision
pub fn buy_quantity(money_per_order: f64, price: f64, lot_precision: u32) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    float_trunc(money_per_order / price, lot_precision)
}

/// Closing order size for a held volume
pub fn sell_quantity(volume: f64, lot_precision: u32) -> f64 {
    float_trunc(volume * SELL_VOLUME_RATIO, lot_precision)
}

/// Render a quantity for the wire without exponent notation
pub fn format_quantity(quantity: f64) -> String {
    match Decimal::from_f64(quantity) {
        Some(d) => d.normalize().to_string(),
        None => quantity.to_string(),
    }
}
