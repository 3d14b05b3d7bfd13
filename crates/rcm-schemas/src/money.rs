//! Fixed-point currency amount, stored as integer cents.
//!
//! Claims XML carries decimal amounts with at most two fraction digits.
//! Parsing straight to `f64` would let rounding drift into persisted
//! totals, so amounts are parsed once into integer cents and all
//! arithmetic downstream stays in that domain.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(i64);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyParseError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount {0:?}")]
    Invalid(String),
    #[error("too many fraction digits in {0:?}")]
    TooManyFractionDigits(String),
    #[error("amount {0:?} overflows i64 cents")]
    Overflow(String),
}

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Parses a decimal string like `"123.4"`, `"-5"`, or `"10.00"` into
    /// whole cents. Rejects anything with more than two fraction digits
    /// rather than silently rounding (mirrors the reject-ambiguity
    /// posture used for other deterministic numeric parses in this
    /// pipeline).
    pub fn parse(raw: &str) -> Result<Money, MoneyParseError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(MoneyParseError::Empty);
        }

        let (sign, unsigned) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, s.strip_prefix('+').unwrap_or(s)),
        };

        if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
            return Err(MoneyParseError::Invalid(raw.to_string()));
        }

        let mut parts = unsigned.splitn(2, '.');
        let int_part = parts.next().unwrap_or("");
        let frac_part = parts.next();

        if int_part.is_empty() && frac_part.is_none() {
            return Err(MoneyParseError::Invalid(raw.to_string()));
        }

        let int_value: i64 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| MoneyParseError::Invalid(raw.to_string()))?
        };

        let frac_cents: i64 = match frac_part {
            None => 0,
            Some(f) if f.is_empty() => 0,
            Some(f) if f.len() == 1 => f
                .parse::<i64>()
                .map_err(|_| MoneyParseError::Invalid(raw.to_string()))?
                * 10,
            Some(f) if f.len() == 2 => f
                .parse::<i64>()
                .map_err(|_| MoneyParseError::Invalid(raw.to_string()))?,
            Some(_) => return Err(MoneyParseError::TooManyFractionDigits(raw.to_string())),
        };

        let whole_cents = int_value
            .checked_mul(100)
            .and_then(|v| v.checked_add(frac_cents))
            .ok_or_else(|| MoneyParseError::Overflow(raw.to_string()))?;

        Ok(Money(sign * whole_cents))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cents = self.0;
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
