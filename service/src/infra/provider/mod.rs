//! [`Provider`]-related definitions.

pub mod sms_activate;

use std::time::Duration;

use common::Money;
use derive_more::{Display, Error as StdError, From};
use rust_decimal::Decimal;

use crate::domain::rental::{
    Code, ExternalId, PhoneNumber, ServiceCode, ServiceName,
};

pub use self::sms_activate::SmsActivate;

/// Phone number provider operation.
pub use common::Handler as Provider;

/// Request to [`Rent`] a phone number.
///
/// [`Rent`]: common::operations::Rent
#[derive(Clone, Debug)]
pub struct Order {
    /// [`ServiceCode`] to rent a phone number for.
    pub service: ServiceCode,

    /// Highest price the provider is allowed to charge.
    pub max_price: Money,
}

/// Phone number granted by a [`Provider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Number {
    /// ID of the activation on the [`Provider`] side.
    pub external_id: ExternalId,

    /// Granted [`PhoneNumber`].
    pub phone_number: PhoneNumber,

    /// Validity window of the granted [`PhoneNumber`], if reported.
    pub ttl: Option<Duration>,
}

/// Status of an activation, as reported by a [`Provider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActivationStatus {
    /// No code has arrived yet.
    Waiting,

    /// [`Code`] was delivered.
    CodeDelivered(Code),

    /// Activation was cancelled on the [`Provider`] side.
    Cancelled,

    /// Response not recognized, or activation is unknown to the [`Provider`].
    Unknown(String),
}

impl ActivationStatus {
    /// Returns the delivered [`Code`], if any.
    #[must_use]
    pub fn into_code(self) -> Option<Code> {
        match self {
            Self::CodeDelivered(code) => Some(code),
            Self::Waiting | Self::Cancelled | Self::Unknown(_) => None,
        }
    }
}

/// Entry of a [`Provider`] price list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Price {
    /// [`ServiceCode`] this [`Price`] is about.
    pub service: ServiceCode,

    /// Human-readable name of the service, if reported.
    pub name: Option<ServiceName>,

    /// Price per phone number.
    pub cost: Money,

    /// Number of phone numbers available.
    pub count: u32,

    /// Validity window of a rented phone number, if reported.
    pub ttl: Option<Duration>,
}

/// Selector of the whole [`Provider`] price list.
#[derive(Clone, Copy, Debug, Default)]
pub struct PriceList;

/// [`Provider`] error.
#[derive(Debug, Display, From, StdError)]
pub enum Error {
    /// No phone numbers are available for the requested service.
    #[display("No phone numbers available")]
    #[from(ignore)]
    NoNumbers,

    /// Provider account has insufficient balance.
    #[display("Provider balance is insufficient")]
    #[from(ignore)]
    NoMoney,

    /// Current provider price exceeds the allowed maximum.
    #[display("Provider price exceeds the allowed maximum")]
    #[from(ignore)]
    MaxPriceExceeded {
        /// Lowest price the provider would accept, if reported.
        min: Option<Decimal>,
    },

    /// Provider rejected the request.
    #[display("Provider rejected the request: {_0}")]
    #[from(ignore)]
    Rejected(#[error(not(source))] String),

    /// Provider response cannot be parsed.
    #[display("Malformed provider response: {_0}")]
    #[from(ignore)]
    Malformed(#[error(not(source))] String),

    /// HTTP transport failed.
    #[display("HTTP request failed: {_0}")]
    Http(reqwest::Error),
}
