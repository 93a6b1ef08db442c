use std::fmt;

use serde::{Deserialize, Serialize};

/// Non-negative fixed-point decimal with 4 decimal places, stored as a scaled integer.
///
/// Serializes as the scaled integer so the wire format never goes through floats.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    const SCALE: u64 = 10_000;

    pub const ZERO: Amount = Amount(0);

    /// Convert a decimal value, rounding to the nearest representable amount.
    /// Returns `None` for negative, non-finite or unrepresentably large input.
    pub fn from_float(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let scaled = (value * Self::SCALE as f64).round();
        // u64::MAX as f64 rounds up to 2^64, which is itself out of range
        if scaled >= u64::MAX as f64 {
            return None;
        }
        Some(Amount(scaled as u64))
    }

    pub fn from_scaled(value: u64) -> Self {
        Amount(value)
    }

    /// Whole units, e.g. `Amount::from_units(100)` is `100.0000`.
    pub fn from_units(value: u64) -> Self {
        Amount(value * Self::SCALE)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::SCALE;
        let frac = self.0 % Self::SCALE;
        write!(f, "{whole}.{frac:04}")
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}
