//! Wallet definitions.
//!
//! Wallets are owned by the external ledger, which is the single source of
//! truth of balances. This module only describes the operations the ledger
//! is asked to perform.

use common::{define_kind, Money};
use derive_more::{Display, From, FromStr, Into};
#[cfg(feature = "postgres")]
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(doc)]
use crate::domain::{Rental, User};
use crate::domain::{rental, user};

/// Provisional, reversible deduction of a wallet balance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Hold {
    /// ID of this [`Hold`].
    pub id: HoldId,

    /// ID of the [`User`] whose wallet this [`Hold`] deducts.
    pub user_id: user::Id,

    /// ID of the [`Rental`] this [`Hold`] was reserved for.
    pub reference: rental::Id,

    /// Reserved amount.
    pub amount: Money,

    /// Current [`HoldStatus`].
    pub status: HoldStatus,
}

/// ID of a [`Hold`].
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
pub struct HoldId(Uuid);

impl HoldId {
    /// Creates a new random [`HoldId`].
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

define_kind! {
    #[doc = "Status of a [`Hold`]."]
    enum HoldStatus {
        #[doc = "Funds are reserved."]
        Reserved = 1,

        #[doc = "Funds are consumed irreversibly."]
        Committed = 2,

        #[doc = "Funds are returned to the wallet."]
        Refunded = 3,
    }
}

define_kind! {
    #[doc = "Reason of a [`Hold`] refund."]
    enum RefundReason {
        #[doc = "Provider rejected the number rental."]
        ProviderRejected = 1,

        #[doc = "[`Rental`] could not be persisted."]
        PersistenceFailed = 2,

        #[doc = "[`User`] cancelled the [`Rental`]."]
        Cancelled = 3,

        #[doc = "[`Rental`] expired without a code."]
        Expired = 4,
    }
}

/// Request to [`Reserve`] funds for a [`Rental`].
///
/// [`Reserve`]: common::operations::Reserve
#[derive(Clone, Copy, Debug)]
pub struct Reservation {
    /// ID of the [`User`] whose funds are reserved.
    pub user_id: user::Id,

    /// Amount to reserve.
    pub amount: Money,

    /// ID of the [`Rental`] being paid, used as an idempotency key.
    pub reference: rental::Id,
}

/// Result of a successful [`Reservation`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Reserved {
    /// ID of the created [`Hold`].
    pub hold_id: HoldId,

    /// Wallet balance after the [`Reservation`].
    pub balance: Money,
}

/// Request to [`Commit`] a [`Hold`].
///
/// [`Commit`]: common::operations::Commit
#[derive(Clone, Copy, Debug)]
pub struct Capture {
    /// ID of the [`User`] owning the [`Hold`].
    pub user_id: user::Id,

    /// ID of the [`Hold`] to commit.
    pub hold_id: HoldId,
}

/// Request to [`Refund`] a [`Hold`].
///
/// [`Refund`]: common::operations::Refund
#[derive(Clone, Copy, Debug)]
pub struct Release {
    /// ID of the [`User`] owning the [`Hold`].
    pub user_id: user::Id,

    /// ID of the [`Hold`] to refund.
    pub hold_id: HoldId,

    /// [`RefundReason`] recorded along with the refund.
    pub reason: RefundReason,
}

/// Request to [`Debit`] a wallet directly, without a [`Hold`].
///
/// Only used for legacy [`Rental`]s created before holds existed.
///
/// [`Debit`]: common::operations::Debit
#[derive(Clone, Copy, Debug)]
pub struct Charge {
    /// ID of the [`User`] to debit.
    pub user_id: user::Id,

    /// Amount to debit.
    pub amount: Money,

    /// ID of the paid [`Rental`], used as an idempotency key.
    pub reference: rental::Id,
}

/// Notification about a changed wallet balance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BalanceChanged {
    /// ID of the [`User`] owning the wallet.
    pub user_id: user::Id,

    /// Wallet balance after the change.
    pub balance: Money,
}
