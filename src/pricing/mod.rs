//! Conversion of token deposits into capacity shares.
//!
//! Shares are fixed-point fractions of the total capacity with
//! [`SHARE_DECIMALS`] decimal places. All arithmetic is integer and rounds
//! toward zero, so the same amount debited from an account can be credited
//! back to the capacity ledger without drift.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::Amount;

pub const SHARE_DECIMALS: u32 = 18;
pub const SHARE_SCALE: u128 = 1_000_000_000_000_000_000; // 1.0 share = 1e18 raw units

/// Deposit that buys one whole share of capacity with the linear curve.
pub const DEFAULT_PRICE_UNIT: Amount = 1_000_000_000;

/// Fractional claim on the total capacity, `raw / SHARE_SCALE`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Share(u128);

impl Share {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(SHARE_SCALE);

    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// `floor(self * numerator / denominator)`.
    pub fn mul_div_floor(self, numerator: u128, denominator: u128) -> Option<Self> {
        mul_div_floor(self.0, numerator, denominator).map(Self)
    }

    /// Bytes of `total_bytes` this share entitles its holder to, rounded down.
    pub fn of_bytes(self, total_bytes: u64) -> u64 {
        match mul_div_floor(self.0, u128::from(total_bytes), SHARE_SCALE) {
            Some(bytes) => u64::try_from(bytes).unwrap_or(u64::MAX),
            None => u64::MAX,
        }
    }
}

impl fmt::Display for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:018}",
            self.0 / SHARE_SCALE,
            self.0 % SHARE_SCALE
        )
    }
}

/// Exact `floor(value * numerator / denominator)` without a 256-bit
/// intermediate. Splitting `value` by the denominator keeps both partial
/// products in range whenever `denominator * numerator` fits in a `u128`.
pub fn mul_div_floor(value: u128, numerator: u128, denominator: u128) -> Option<u128> {
    if denominator == 0 {
        return None;
    }
    let quotient = value / denominator;
    let remainder = value % denominator;
    let whole = quotient.checked_mul(numerator)?;
    let fraction = remainder.checked_mul(numerator)? / denominator;
    whole.checked_add(fraction)
}

/// Maps a deposited amount to the share of capacity it buys.
pub trait PricingCurve {
    fn allocate(&self, amount: Amount) -> Option<Share>;
}

/// Constant price: every `unit` tokens buy exactly one share.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearCurve {
    unit: Amount,
}

impl LinearCurve {
    /// Returns `None` for a zero unit.
    pub fn new(unit: Amount) -> Option<Self> {
        (unit > 0).then_some(Self { unit })
    }
}

impl Default for LinearCurve {
    fn default() -> Self {
        Self {
            unit: DEFAULT_PRICE_UNIT,
        }
    }
}

impl PricingCurve for LinearCurve {
    fn allocate(&self, amount: Amount) -> Option<Share> {
        mul_div_floor(u128::from(amount), SHARE_SCALE, u128::from(self.unit)).map(Share)
    }
}
