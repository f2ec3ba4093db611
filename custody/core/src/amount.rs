// Copyright (c) 2024 The Botho Foundation

//! Native coin amounts.
//!
//! Amounts are carried as integer nano-units everywhere inside the service.
//! The human-denominated form (`1.5`) only exists at the edges: parsing
//! withdrawal requests and formatting notification payloads.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Nano-units per whole coin.
pub const NANOS_PER_COIN: u64 = 1_000_000_000;

/// Number of decimal places of the native coin.
pub const DECIMALS: usize = 9;

/// Errors produced while parsing an amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount cannot be negative")]
    Negative,

    #[error("invalid amount format: {0}")]
    Format(String),

    #[error("amount has more than {DECIMALS} decimal places")]
    TooPrecise,

    #[error("amount overflows")]
    Overflow,
}

/// An amount of the native coin, in nano-units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Coins(u64);

impl Coins {
    pub const ZERO: Coins = Coins(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn nanos(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Coins) -> Option<Coins> {
        self.0.checked_add(other.0).map(Coins)
    }

    pub fn saturating_sub(self, other: Coins) -> Coins {
        Coins(self.0.saturating_sub(other.0))
    }

    /// Parse a raw integer string as returned by the ledger API.
    pub fn from_nanos_str(raw: &str) -> Result<Self, AmountError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AmountError::Empty);
        }
        if raw.starts_with('-') {
            return Err(AmountError::Negative);
        }
        raw.parse::<u64>()
            .map(Coins)
            .map_err(|_| AmountError::Format(raw.to_string()))
    }
}

impl std::iter::Sum for Coins {
    fn sum<I: Iterator<Item = Coins>>(iter: I) -> Self {
        iter.fold(Coins::ZERO, |acc, c| Coins(acc.0.saturating_add(c.0)))
    }
}

impl FromStr for Coins {
    type Err = AmountError;

    /// Parse a human-denominated amount such as `"0.05"` or `"12"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AmountError::Empty);
        }
        if s.starts_with('-') {
            return Err(AmountError::Negative);
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(AmountError::Format(s.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AmountError::Format(s.to_string()));
        }
        if frac.len() > DECIMALS {
            return Err(AmountError::TooPrecise);
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| AmountError::Overflow)?
        };
        let frac_nanos: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<width$}", frac, width = DECIMALS)
                .parse()
                .map_err(|_| AmountError::Format(s.to_string()))?
        };

        whole
            .checked_mul(NANOS_PER_COIN)
            .and_then(|n| n.checked_add(frac_nanos))
            .map(Coins)
            .ok_or(AmountError::Overflow)
    }
}

impl fmt::Display for Coins {
    /// Human-denominated form with trailing zeros trimmed (`1.5`, `0.01`, `3`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / NANOS_PER_COIN;
        let frac = self.0 % NANOS_PER_COIN;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let frac = format!("{:0width$}", frac, width = DECIMALS);
        write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
    }
}

/// Serde adapter writing [`Coins`] in the human-denominated string form.
pub mod human {
    use super::Coins;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(coins: &Coins, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(coins)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Coins, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Serde adapter writing [`Coins`] as a JSON number of whole coins.
///
/// Exact up to 2^53 nanos; larger amounts round to the nearest double.
pub mod number {
    use super::{Coins, NANOS_PER_COIN};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(coins: &Coins, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(coins.0 as f64 / NANOS_PER_COIN as f64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Coins, D::Error> {
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() {
            return Err(de::Error::custom("amount is not a finite number"));
        }
        value.to_string().parse().map_err(de::Error::custom)
    }
}
