//! [`Ledger`]-related definitions.

use common::Money;
use derive_more::{Display, Error as StdError, From};

#[cfg(feature = "postgres")]
use crate::infra::postgres;
use crate::domain::wallet;

/// Wallet ledger operation.
///
/// The ledger is the single source of truth of wallet balances and must
/// treat every operation as idempotent: repeating a reservation with the
/// same reference, committing a committed hold or refunding a refunded one
/// succeeds without changing the balance twice.
pub use common::Handler as Ledger;

/// [`Ledger`] error.
#[derive(Debug, Display, From, StdError)]
pub enum Error {
    /// Wallet doesn't have enough funds.
    #[display("Insufficient funds: {balance} available, {required} required")]
    #[from(ignore)]
    InsufficientFunds {
        /// Current wallet balance.
        balance: Money,

        /// Required amount.
        required: Money,
    },

    /// [`wallet::Hold`] doesn't exist.
    #[display("`Hold(id: {_0})` does not exist")]
    #[from(ignore)]
    HoldNotFound(#[error(not(source))] wallet::HoldId),

    /// [`wallet::Hold`] is already settled in the opposite way.
    #[display("`Hold(id: {_0})` is already settled")]
    #[from(ignore)]
    HoldSettled(#[error(not(source))] wallet::HoldId),

    /// Amount cannot be kept in the wallet.
    #[display("Invalid amount: {_0}")]
    #[from(ignore)]
    InvalidAmount(#[error(not(source))] Money),

    /// Caller is not allowed to operate the wallet or the hold.
    #[display("Operation is not authorized")]
    #[from(ignore)]
    Unauthorized,

    #[cfg(feature = "postgres")]
    /// [`Postgres`] error.
    ///
    /// [`Postgres`]: postgres::Postgres
    Postgres(postgres::Error),
}

impl Error {
    /// Indicates whether this [`Error`] may be caused by a short-lived
    /// ownership race, so the operation is worth retrying once.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}
