use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::{PricingBreakdown, Stay};

/// Round to whole currency units, halves away from zero.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Price a stay at `base_rate` per night.
///
/// Nightly: `nights * base_rate`. Hourly: `hours * base_rate * 0.40`, with
/// hours rounded to one decimal. `total = round(subtotal * 1.18)` and
/// `tax = total - subtotal`. Pure and deterministic.
pub fn price(base_rate: Decimal, stay: &Stay) -> Result<PricingBreakdown, EngineError> {
    if base_rate <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "base rate must be positive, got {base_rate}"
        )));
    }

    let (units, unit_price) = match *stay {
        Stay::Nightly { check_in, check_out } => {
            // Dates carry no partial days, so the ceiling is the day difference.
            let nights = (check_out - check_in).num_days();
            if nights <= 0 || nights > MAX_NIGHTS {
                return Err(EngineError::InvalidDuration(format!(
                    "{nights} nights outside [{MIN_NIGHTS}, {MAX_NIGHTS}]"
                )));
            }
            (Decimal::from(nights), base_rate)
        }
        Stay::Hourly { from, to, .. } => {
            // Bounds apply to the exact length; rounding is for billing only.
            let secs = (to - from).num_seconds();
            if !(MIN_DAY_USE_SECS..=MAX_DAY_USE_SECS).contains(&secs) {
                return Err(EngineError::InvalidDuration(format!(
                    "day-use of {secs}s outside [{MIN_DAY_USE_SECS}s, {MAX_DAY_USE_SECS}s]"
                )));
            }
            let hours = (Decimal::from(secs) / dec!(3600))
                .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero);
            (hours, base_rate * HOURLY_RATE_FACTOR)
        }
    };

    let subtotal = units * unit_price;
    let total = round_currency(subtotal * (Decimal::ONE + TAX_RATE));
    Ok(PricingBreakdown {
        units,
        subtotal,
        tax: total - subtotal,
        total,
    })
}
