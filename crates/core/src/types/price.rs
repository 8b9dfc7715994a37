//! Type-safe price representation using decimal arithmetic.
//!
//! The storefront sells in Mexican pesos only, so a [`Price`] carries no
//! currency code of its own. Amounts are kept at full precision; rounding
//! happens only when an amount is formatted for display.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, Mul};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// ISO 4217 code of the only supported currency.
pub const CURRENCY_CODE: &str = "MXN";

/// An amount of money in Mexican pesos.
///
/// Serializes as a decimal string (`"39.99"`) so no precision is lost on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// A zero amount.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a new price from a decimal amount.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Create a price from a whole number of centavos.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // splits the magnitude into 32-bit words
    pub const fn from_cents(cents: i64) -> Self {
        let magnitude = cents.unsigned_abs();
        Self(Decimal::from_parts(
            magnitude as u32,
            (magnitude >> 32) as u32,
            0,
            cents < 0,
            2,
        ))
    }

    /// The underlying decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Whether the amount is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Format for display, e.g. `$1,234.56 MXN`.
    #[must_use]
    pub fn display_mxn(&self) -> String {
        let rounded = self
            .0
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
            "-"
        } else {
            ""
        };
        let fixed = format!("{:.2}", rounded.abs());
        let (int_part, dec_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

        format!(
            "{sign}${}.{dec_part} {CURRENCY_CODE}",
            group_thousands(int_part)
        )
    }
}

/// Insert `,` between every group of three digits, counting from the right.
fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_mxn())
    }
}

impl From<Decimal> for Price {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Mul<u32> for Price {
    type Output = Self;

    fn mul(self, quantity: u32) -> Self {
        Self(self.0 * Decimal::from(quantity))
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rate: Decimal) -> Self {
        Self(self.0 * rate)
    }
}

impl Sum for Price {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}
