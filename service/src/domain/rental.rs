//! [`Rental`] definitions.

use common::{define_kind, unit, DateTime, DateTimeOf, Money};
use derive_more::{AsRef, Display, From, FromStr, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(doc)]
use crate::domain::User;
use crate::domain::{user, wallet};

/// Rented disposable phone number awaiting a verification code.
///
/// A [`Rental`] is the unit of billing: it owns exactly one wallet hold and
/// exactly one provider activation for its whole [`Status::Active`] lifetime.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rental {
    /// ID of this [`Rental`].
    ///
    /// Generated before any remote call and used as the reference of the
    /// wallet hold.
    pub id: Id,

    /// ID of the [`User`] owning this [`Rental`].
    pub user_id: user::Id,

    /// ID of the activation on the provider side.
    pub external_id: ExternalId,

    /// [`ServiceCode`] the phone number was rented for.
    pub service: ServiceCode,

    /// Human-readable name of the rented service.
    pub service_name: ServiceName,

    /// Rented [`PhoneNumber`].
    pub phone_number: PhoneNumber,

    /// Price charged by the provider.
    pub original_price: Money,

    /// Price billed to the [`User`].
    pub price: Money,

    /// Current [`Status`] of this [`Rental`].
    pub status: Status,

    /// Verification [`Code`] delivered to the [`PhoneNumber`], if any.
    pub code: Option<Code>,

    /// [`DateTime`] when this [`Rental`] was created.
    pub created_at: CreationDateTime,

    /// [`DateTime`] when the rented [`PhoneNumber`] stops being usable.
    pub expires_at: ExpirationDateTime,

    /// ID of the wallet hold reserving the [`Rental::price`].
    ///
    /// [`None`] for legacy rentals billed directly on success.
    pub hold_id: Option<wallet::HoldId>,
}

impl Rental {
    /// Indicates whether this [`Rental`] is still [`Status::Active`].
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    /// Indicates whether this [`Rental`] has expired at the provided
    /// [`DateTime`].
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime) -> bool {
        now > self.expires_at.coerce()
    }

    /// Indicates whether this [`Rental`] has expired already.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(DateTime::now())
    }

    /// Indicates whether this [`Rental`] is expired, but still
    /// [`Status::Active`], so requires reconciliation.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime) -> bool {
        self.is_active() && self.is_expired_at(now)
    }

    /// Applies the provided [`Outcome`] to this [`Rental`].
    ///
    /// Does nothing if this [`Rental`] is not [`Status::Active`] anymore, as
    /// terminal [`Status`]es are never left.
    pub fn settle(&mut self, outcome: Outcome) {
        if !self.is_active() {
            return;
        }
        self.status = outcome.status();
        if let Outcome::Completed(code) = outcome {
            self.code = Some(code);
        }
    }
}

/// ID of a [`Rental`].
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
    Ord,
    PartialEq,
    PartialOrd,
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

/// ID of a [`Rental`] activation on the provider side.
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, PartialEq)]
#[as_ref(str, String)]
#[cfg_attr(feature = "postgres", derive(FromSql, ToSql), postgres(transparent))]
pub struct ExternalId(String);

impl ExternalId {
    /// Creates a new [`ExternalId`] if the given `id` is valid.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        (!id.is_empty() && id.trim() == id).then_some(Self(id))
    }
}

/// Code of a provider service a phone number is rented for (`tg`, `wa`).
#[derive(AsRef, Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[as_ref(str, String)]
#[cfg_attr(feature = "postgres", derive(FromSql, ToSql), postgres(transparent))]
pub struct ServiceCode(String);

impl ServiceCode {
    /// Creates a new [`ServiceCode`] if the given `code` is valid.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Option<Self> {
        let code = code.into();
        Self::check(&code).then_some(Self(code))
    }

    /// Checks whether the given `code` is a valid [`ServiceCode`].
    fn check(code: impl AsRef<str>) -> bool {
        let code = code.as_ref();
        !code.is_empty()
            && code.len() <= 32
            && code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl std::str::FromStr for ServiceCode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid `ServiceCode`")
    }
}

/// Human-readable name of a rented service.
#[derive(AsRef, Clone, Debug, Display, Eq, PartialEq)]
#[as_ref(str, String)]
#[cfg_attr(feature = "postgres", derive(FromSql, ToSql), postgres(transparent))]
pub struct ServiceName(String);

impl ServiceName {
    /// Creates a new [`ServiceName`], trimming the provided `name`.
    ///
    /// [`None`] is returned if the trimmed `name` is empty.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Option<Self> {
        let name = name.as_ref().trim();
        (!name.is_empty()).then(|| Self(name.to_owned()))
    }
}

impl From<&ServiceCode> for ServiceName {
    fn from(code: &ServiceCode) -> Self {
        Self(code.to_string())
    }
}

/// Rented phone number in international format.
#[derive(AsRef, Clone, Debug, Display, Eq, PartialEq)]
#[as_ref(str, String)]
#[cfg_attr(feature = "postgres", derive(FromSql, ToSql), postgres(transparent))]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Creates a new [`PhoneNumber`] if the given `number` is valid.
    ///
    /// A leading `+` is allowed, all other characters must be digits.
    #[must_use]
    pub fn new(number: impl Into<String>) -> Option<Self> {
        let number = number.into();
        let digits = number.strip_prefix('+').unwrap_or(&number);
        (digits.len() >= 6
            && digits.len() <= 16
            && digits.chars().all(|c| c.is_ascii_digit()))
        .then_some(Self(number))
    }
}

/// Verification code delivered to a rented [`PhoneNumber`].
#[derive(AsRef, Clone, Debug, Display, Eq, PartialEq)]
#[as_ref(str, String)]
#[cfg_attr(feature = "postgres", derive(FromSql, ToSql), postgres(transparent))]
pub struct Code(String);

impl Code {
    /// Creates a new [`Code`] if the given `code` is not blank.
    #[must_use]
    pub fn new(code: impl AsRef<str>) -> Option<Self> {
        let code = code.as_ref().trim();
        (!code.is_empty()).then(|| Self(code.to_owned()))
    }
}

define_kind! {
    #[doc = "Status of a [`Rental`]."]
    enum Status {
        #[doc = "Number is rented and waits for a code."]
        Active = 1,

        #[doc = "Code was delivered and the [`Rental`] is billed."]
        Completed = 2,

        #[doc = "[`Rental`] ended without a code and is refunded."]
        Cancelled = 3,
    }
}

impl Status {
    /// Indicates whether this [`Status`] is terminal and cannot be left.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Terminal outcome of a [`Rental`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// [`Code`] was delivered.
    Completed(Code),

    /// [`Rental`] was cancelled by its [`User`] or by reconciliation.
    Cancelled,
}

impl Outcome {
    /// Returns the terminal [`Status`] of this [`Outcome`].
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Completed(_) => Status::Completed,
            Self::Cancelled => Status::Cancelled,
        }
    }
}

/// Guarded transition of an [`Status::Active`] [`Rental`] into a terminal
/// [`Outcome`].
///
/// Applying a [`Transition`] to a [`Rental`] which is not
/// [`Status::Active`] anymore has no effect.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    /// ID of the [`Rental`] to transition.
    pub rental_id: Id,

    /// [`Outcome`] to transition into.
    pub outcome: Outcome,
}

/// [`DateTime`] when a [`Rental`] was created.
pub type CreationDateTime = DateTimeOf<(Rental, unit::Creation)>;

/// [`DateTime`] when a [`Rental`] expires.
pub type ExpirationDateTime = DateTimeOf<(Rental, unit::Expiration)>;

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::{Currency, DateTime, Money};

    use crate::domain::user;

    use super::{
        Code, ExternalId, Id, Outcome, PhoneNumber, Rental, ServiceCode,
        ServiceName, Status,
    };

    fn rental(expires_in: Duration) -> Rental {
        let now = DateTime::now();
        let service = ServiceCode::new("tg").unwrap();
        Rental {
            id: Id::new(),
            user_id: user::Id::new(),
            external_id: ExternalId::new("1001").unwrap(),
            service_name: ServiceName::from(&service),
            service,
            phone_number: PhoneNumber::new("+79990001122").unwrap(),
            original_price: Money::from_minor(100, Currency::Usd),
            price: Money::from_minor(200, Currency::Usd),
            status: Status::Active,
            code: None,
            created_at: now.coerce(),
            expires_at: (now + expires_in).coerce(),
            hold_id: None,
        }
    }

    #[test]
    fn terminal_status_is_never_left() {
        let mut r = rental(Duration::from_secs(60));

        r.settle(Outcome::Completed(Code::new("482913").unwrap()));
        assert_eq!(r.status, Status::Completed);
        assert_eq!(r.code, Code::new("482913"));

        r.settle(Outcome::Cancelled);
        assert_eq!(r.status, Status::Completed);
        assert_eq!(r.code, Code::new("482913"));
    }

    #[test]
    fn cancelled_rental_keeps_no_code() {
        let mut r = rental(Duration::from_secs(60));

        r.settle(Outcome::Cancelled);
        r.settle(Outcome::Completed(Code::new("1").unwrap()));

        assert_eq!(r.status, Status::Cancelled);
        assert_eq!(r.code, None);
        assert!(Status::Cancelled.is_terminal());
        assert!(!Status::Active.is_terminal());
    }

    #[test]
    fn detects_stale_rentals() {
        let r = rental(Duration::from_secs(60));
        let later = DateTime::now() + Duration::from_secs(61);

        assert!(!r.is_expired());
        assert!(r.is_expired_at(later));
        assert!(r.is_stale_at(later));

        let mut done = r.clone();
        done.settle(Outcome::Cancelled);
        assert!(!done.is_stale_at(later));
    }

    #[test]
    fn validates_identifiers() {
        assert!(ServiceCode::new("tg").is_some());
        assert!(ServiceCode::new("some_service-2").is_some());
        assert!(ServiceCode::new("").is_none());
        assert!(ServiceCode::new("t g").is_none());

        assert!(PhoneNumber::new("79990001122").is_some());
        assert!(PhoneNumber::new("+79990001122").is_some());
        assert!(PhoneNumber::new("+7999-000").is_none());

        assert!(Code::new("  ").is_none());
        assert_eq!(Code::new(" 42 ").unwrap().to_string(), "42");

        assert!(ExternalId::new("").is_none());
    }
}
