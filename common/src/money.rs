//! [`Money`]-related definitions.

use std::{cmp::Ordering, fmt, ops, str::FromStr};

use rust_decimal::{prelude::ToPrimitive as _, Decimal, RoundingStrategy};

use crate::define_kind;

/// Amount of money in some [`Currency`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Money {
    /// Amount of this [`Money`].
    pub amount: Decimal,

    /// [`Currency`] of this amount.
    pub currency: Currency,
}

impl Money {
    /// Creates a new zero [`Money`] amount in the provided [`Currency`].
    #[must_use]
    pub const fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// Creates a new [`Money`] from the provided amount of minor units (cents,
    /// kopecks) of the [`Currency`].
    #[must_use]
    pub fn from_minor(units: i64, currency: Currency) -> Self {
        Self {
            amount: Decimal::new(units, currency.minor_digits()),
            currency,
        }
    }

    /// Returns this [`Money`] as an integral amount of minor units of its
    /// [`Currency`], rounding it first.
    ///
    /// [`None`] is returned if the amount doesn't fit into [`i64`].
    #[must_use]
    pub fn minor_units(self) -> Option<i64> {
        let rounded = self.round_to_minor();
        rounded
            .amount
            .checked_mul(Decimal::from(
                10_i64.pow(self.currency.minor_digits()),
            ))?
            .to_i64()
    }

    /// Rounds this [`Money`] to the minor unit of its [`Currency`], rounding
    /// midpoints away from zero.
    #[must_use]
    pub fn round_to_minor(self) -> Self {
        Self {
            amount: self.amount.round_dp_with_strategy(
                self.currency.minor_digits(),
                RoundingStrategy::MidpointAwayFromZero,
            ),
            currency: self.currency,
        }
    }

    /// Indicates whether this [`Money`] amount is strictly positive.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

impl ops::Mul<Decimal> for Money {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self {
            amount: self.amount * rhs,
            currency: self.currency,
        }
    }
}

/// [`Money`] amounts are only comparable within the same [`Currency`].
impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self.currency == other.currency)
            .then(|| self.amount.cmp(&other.amount))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { amount, currency } = self;
        if amount.is_integer() {
            write!(f, "{}{currency}", amount.to_i128().expect("integer"))
        } else {
            write!(f, "{amount}{currency}")
        }
    }
}

impl FromStr for Money {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < 4 {
            return Err("too short");
        }

        let (amount, currency) = s.split_at(s.len() - 3);
        let amount = Decimal::from_str(amount).map_err(|_| "invalid amount")?;
        let currency =
            Currency::from_str(currency).map_err(|_| "invalid currency")?;

        Ok(Self { amount, currency })
    }
}

define_kind! {
    #[doc = "Currency of a [`Money`] amount."]
    enum Currency {
        #[doc = "US Dollar."]
        Usd = 1,

        #[doc = "Euro."]
        Eur = 2,

        #[doc = "Russian Ruble."]
        Rub = 3,
    }
}

impl Currency {
    /// Returns the number of decimal digits in a minor unit of this
    /// [`Currency`].
    #[must_use]
    pub const fn minor_digits(self) -> u32 {
        match self {
            Self::Usd | Self::Eur | Self::Rub => 2,
        }
    }
}
