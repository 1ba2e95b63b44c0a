//! [`Command`] for cancelling a [`Rental`].

use common::{
    operations::{By, Cancel, Refund, Select, Update},
    Money,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

#[cfg(doc)]
use crate::domain::User;
use crate::{
    domain::{
        rental::{self, ExternalId, Outcome, Transition},
        user,
        wallet::{Hold, RefundReason, Release},
        Rental,
    },
    infra::{database, ledger, provider, Database, Ledger, Provider},
    Service,
};

use super::Command;

/// [`Command`] for cancelling a [`Rental`].
///
/// Releases the phone number, refunds the reservation and only then marks the
/// [`Rental`] as cancelled, so observers of a cancelled [`Rental`] never see a
/// stale balance. Returns whether this call cancelled the [`Rental`].
#[derive(Clone, Copy, Debug)]
pub struct CancelRental {
    /// ID of the [`Rental`] to cancel.
    pub rental_id: rental::Id,

    /// ID of the [`User`] owning the [`Rental`].
    pub user_id: user::Id,
}

impl<Db, Ld, Pr> Command<CancelRental> for Service<Db, Ld, Pr>
where
    Db: Database<
            Select<By<Option<Rental>, rental::Id>>,
            Ok = Option<Rental>,
            Err = Traced<database::Error>,
        > + Database<
            Update<Transition>,
            Ok = bool,
            Err = Traced<database::Error>,
        >,
    Ld: Ledger<
            Select<By<Option<Hold>, rental::Id>>,
            Ok = Option<Hold>,
            Err = Traced<ledger::Error>,
        > + Ledger<Refund<Release>, Ok = Money, Err = Traced<ledger::Error>>,
    Pr: Provider<
        Cancel<ExternalId>,
        Ok = bool,
        Err = Traced<provider::Error>,
    >,
{
    type Ok = bool;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: CancelRental) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let CancelRental { rental_id, user_id } = cmd;

        let rental = self
            .database()
            .execute(Select(By::<Option<Rental>, _>::new(rental_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .filter(|r| r.user_id == user_id)
            .ok_or(E::RentalNotExists(rental_id))
            .map_err(tracerr::wrap!())?;

        if !rental.is_active() {
            return Ok(false);
        }

        self.release_number(&rental).await;

        let hold_id = self
            .resolve_hold(&rental)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if let Some(hold_id) = hold_id {
            _ = self
                .refund_with_retry(user_id, hold_id, RefundReason::Cancelled)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
        } else {
            log::warn!("`Rental(id: {rental_id})` has no hold to refund");
        }

        let cancelled = self
            .database()
            .execute(Update(Transition {
                rental_id,
                outcome: Outcome::Cancelled,
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if cancelled {
            log::info!("`Rental(id: {rental_id})` is cancelled");
        }
        Ok(cancelled)
    }
}

/// Error of [`CancelRental`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Ledger`] error.
    #[display("`Ledger` operation failed: {_0}")]
    Ledger(ledger::Error),

    /// [`Rental`] with the provided ID does not exist.
    #[display("`Rental(id: {_0})` does not exist")]
    #[from(ignore)]
    RentalNotExists(#[error(not(source))] rental::Id),
}
