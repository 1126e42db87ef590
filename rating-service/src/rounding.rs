//! Final rounding pass applied to every monetary value.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Default scaler: seven decimal digits.
pub const DEFAULT_SCALER: f64 = 1e7;

/// Normalizes floating point results to a fixed number of decimal digits so
/// that arithmetic noise never shows up as an invoice line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rounder {
    scaler: f64,
}

impl Rounder {
    pub fn new(scaler: f64) -> Self {
        let scaler = if scaler.is_finite() && scaler >= 1.0 {
            scaler
        } else {
            DEFAULT_SCALER
        };
        Self { scaler }
    }

    pub fn scaler(&self) -> f64 {
        self.scaler
    }

    /// Round to the scaler's precision, halves away from zero, in decimal
    /// arithmetic. Values within one scaler unit of zero become exactly zero
    /// (including negative zero).
    pub fn round(&self, value: f64) -> f64 {
        if !value.is_finite() || value.abs() < 1.0 / self.scaler {
            return 0.0;
        }
        let rounded = Decimal::from_f64(value)
            .zip(Decimal::from_f64(self.scaler))
            .and_then(|(value, scaler)| {
                value
                    .checked_mul(scaler)?
                    .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                    .checked_div(scaler)
            })
            .and_then(|rounded| rounded.to_f64())
            // Beyond decimal range there is nothing left to round.
            .unwrap_or(value);
        if rounded == 0.0 {
            0.0
        } else {
            rounded
        }
    }
}

impl Default for Rounder {
    fn default() -> Self {
        Self::new(DEFAULT_SCALER)
    }
}
