//! [`User`] definitions.

pub mod session;

use derive_more::{Display, From, FromStr, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(doc)]
use crate::domain::Rental;

pub use self::session::Session;

/// Wallet owner renting phone numbers.
///
/// Users are managed by an external identity provider, so only their [`Id`]
/// is known to this service. Every [`Rental`] and wallet hold is scoped to
/// its owning [`User`].
#[derive(Clone, Copy, Debug)]
pub struct User {
    /// ID of this [`User`].
    pub id: Id,
}

/// ID of a [`User`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    From,
    FromStr,
    Hash,
    Into,
    PartialEq,
    Serialize,
)]
#[cfg_attr(feature = "postgres", derive(ToSql, FromSql), postgres(transparent))]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random [`Id`].
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}
