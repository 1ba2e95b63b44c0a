//! [`Quote`] definitions.

use std::{collections::HashMap, time::Duration};

use common::{Money, Percent};
use rust_decimal::Decimal;

use crate::domain::rental::{ServiceCode, ServiceName};

/// Multiplier applied to a provider price to get the billed price.
pub const MARKUP: Decimal = Decimal::TWO;

/// Short-lived pricing snapshot of a provider service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Quote {
    /// [`ServiceCode`] this [`Quote`] is about.
    pub service: ServiceCode,

    /// Human-readable name of the service.
    pub name: ServiceName,

    /// Price per number charged by the provider.
    pub original_price: Money,

    /// Price per number billed to a user.
    pub price: Money,

    /// Number of phone numbers available for rent.
    pub available: u32,

    /// Validity window of a rented number, as hinted by the provider.
    pub ttl: Option<Duration>,
}

impl Quote {
    /// Creates a new [`Quote`] applying the [`MARKUP`] to the provided
    /// `original_price`.
    #[must_use]
    pub fn new(
        service: ServiceCode,
        name: Option<ServiceName>,
        original_price: Money,
        available: u32,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            name: name.unwrap_or_else(|| ServiceName::from(&service)),
            service,
            price: (original_price * MARKUP).round_to_minor(),
            original_price,
            available,
            ttl: ttl.filter(|ttl| !ttl.is_zero()),
        }
    }

    /// Indicates whether any phone numbers are available for rent.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available > 0
    }

    /// Returns the highest price the provider is allowed to charge for a
    /// number of this [`Quote`], bounding upstream price drift by the
    /// provided [`Percent`].
    ///
    /// Sub-minor prices keep their precision, so the ceiling never falls
    /// below the original price.
    #[must_use]
    pub fn max_price(&self, drift: Percent) -> Money {
        let ceiling = self.original_price * (Decimal::ONE + drift.fraction());
        let rounded = ceiling.round_to_minor();
        if rounded < self.original_price {
            ceiling
        } else {
            rounded
        }
    }
}

/// [`Quote`]s of all the provider services.
pub type Quotes = HashMap<ServiceCode, Quote>;
