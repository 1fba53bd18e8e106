//! Human-readable USDC prices.
//!
//! Content prices are authored as decimal strings (`"1.50"`, `"$0.25"`) and
//! quoted against the price oracle in USDC base units (6 decimals).

use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of decimals used by USDC.
pub const USDC_DECIMALS: u32 = 6;

/// Errors returned when parsing a [`UsdcAmount`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    /// The input is not a decimal number.
    #[error("invalid price '{0}'")]
    Invalid(String),
    /// Prices cannot be negative.
    #[error("price cannot be negative")]
    Negative,
    /// More fractional digits than USDC can represent.
    #[error("price has more than {USDC_DECIMALS} decimal places")]
    TooPrecise,
    /// The value does not fit in base units.
    #[error("price is too large")]
    Overflow,
}

/// An amount of USDC held in base units (1 USDC = 1 000 000 units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UsdcAmount(u128);

impl UsdcAmount {
    /// Creates an amount from raw base units.
    #[must_use]
    pub const fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    /// Parses a decimal price, accepting an optional leading `$`.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError`] when the input is not a non-negative decimal
    /// with at most six fractional digits.
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let value =
            Decimal::from_str(trimmed).map_err(|_| AmountError::Invalid(input.to_owned()))?;
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative);
        }
        if value.normalize().scale() > USDC_DECIMALS {
            return Err(AmountError::TooPrecise);
        }
        let units = value
            .checked_mul(Decimal::from(10u64.pow(USDC_DECIMALS)))
            .ok_or(AmountError::Overflow)?;
        units
            .trunc()
            .to_u128()
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Raw base units.
    #[must_use]
    pub const fn as_base_units(&self) -> u128 {
        self.0
    }

    /// Base units widened for contract calls.
    #[must_use]
    pub fn to_u256(&self) -> U256 {
        U256::from(self.0)
    }

    /// Whether the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for UsdcAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for UsdcAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 10u128.pow(USDC_DECIMALS);
        let frac = self.0 % 10u128.pow(USDC_DECIMALS);
        write!(f, "{whole}.{:02}", frac / 10_000)?;
        let rest = frac % 10_000;
        if rest != 0 {
            let digits = format!("{rest:04}");
            write!(f, "{}", digits.trim_end_matches('0'))?;
        }
        Ok(())
    }
}

impl Serialize for UsdcAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UsdcAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
