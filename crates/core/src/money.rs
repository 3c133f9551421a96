//! Fixed-point money in minor currency units.
//!
//! Amounts are stored as an `i64` count of the smallest currency unit (e.g. cents),
//! so totals round the same way on every run.

use core::fmt;
use core::iter::Sum;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Number of minor units in one major unit.
const MINOR_PER_MAJOR: i64 = 100;

/// A monetary amount in minor units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor_units(&self) -> i64 {
        self.0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(DomainError::Overflow)
    }

    /// Multiply a unit price by a quantity.
    pub fn checked_mul(self, quantity: u32) -> DomainResult<Money> {
        self.0
            .checked_mul(i64::from(quantity))
            .map(Money)
            .ok_or(DomainError::Overflow)
    }

    /// Sum amounts, failing instead of wrapping on overflow.
    pub fn checked_sum<I>(amounts: I) -> DomainResult<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = MINOR_PER_MAJOR as u64;
        write!(f, "{sign}{}.{:02}", abs / per, abs % per)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    /// Parse a decimal amount such as `"10"`, `"2.5"` or `"-3.25"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid money amount: {s:?}"));

        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) if !f.is_empty() => (w, f),
            Some(_) => return Err(invalid()),
            None => (digits, ""),
        };

        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac_minor: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse::<i64>().map_err(|_| invalid())?,
        };

        let minor = whole
            .checked_mul(MINOR_PER_MAJOR)
            .and_then(|v| v.checked_add(frac_minor))
            .ok_or(DomainError::Overflow)?;

        Ok(Money(if negative { -minor } else { minor }))
    }
}

impl Sum for Money {
    /// Saturating sum; use [`Money::checked_sum`] where overflow must be reported.
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        Money(iter.fold(0i64, |acc, m| acc.saturating_add(m.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_decimal_strings() {
        assert_eq!("10.00".parse::<Money>().unwrap(), Money::from_minor(1000));
        assert_eq!("2.5".parse::<Money>().unwrap(), Money::from_minor(250));
        assert_eq!("7".parse::<Money>().unwrap(), Money::from_minor(700));
        assert_eq!("-3.25".parse::<Money>().unwrap(), Money::from_minor(-325));
        assert_eq!(" 0.01 ".parse::<Money>().unwrap(), Money::from_minor(1));
    }

    #[test]
    fn rejects_malformed_amounts() {
        for bad in ["", "abc", "1.234", "1.", ".5", "1,50", "--1", "1.x"] {
            assert!(bad.parse::<Money>().is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Money::from_minor(3500).to_string(), "35.00");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-125).to_string(), "-1.25");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn price_times_quantity_is_exact() {
        let ten = "10.00".parse::<Money>().unwrap();
        let two_fifty = "2.50".parse::<Money>().unwrap();
        let total =
            Money::checked_sum([ten.checked_mul(3).unwrap(), two_fifty.checked_mul(2).unwrap()])
                .unwrap();
        assert_eq!(total.to_string(), "35.00");
    }

    #[test]
    fn overflow_is_reported() {
        let big = Money::from_minor(i64::MAX);
        assert_eq!(big.checked_mul(2), Err(DomainError::Overflow));
        assert_eq!(
            Money::checked_sum([big, Money::from_minor(1)]),
            Err(DomainError::Overflow)
        );
        assert_eq!("99999999999999999".parse::<Money>(), Err(DomainError::Overflow));
    }

    proptest! {
        #[test]
        fn display_then_parse_is_identity(minor in -1_000_000_000i64..1_000_000_000i64) {
            let m = Money::from_minor(minor);
            prop_assert_eq!(m.to_string().parse::<Money>().unwrap(), m);
        }

        #[test]
        fn sum_is_order_independent(
            amounts in prop::collection::vec(0i64..10_000_000i64, 0..20)
        ) {
            let forward: Vec<Money> = amounts.iter().copied().map(Money::from_minor).collect();
            let mut reversed = forward.clone();
            reversed.reverse();
            prop_assert_eq!(
                Money::checked_sum(forward).unwrap(),
                Money::checked_sum(reversed).unwrap()
            );
        }
    }
}
