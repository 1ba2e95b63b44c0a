//! [`Command`] for checking whether a [`Rental`] received its code.

use common::{
    operations::{By, Commit, Debit, Select, Update},
    Money,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;

#[cfg(doc)]
use crate::domain::{rental::Code, User};
use crate::{
    domain::{
        rental::{self, ExternalId, Outcome, Transition},
        user,
        wallet::{Capture, Charge},
        Rental,
    },
    infra::{
        database, ledger,
        provider::{self, ActivationStatus},
        Database, Ledger, Provider,
    },
    Service,
};

use super::Command;

/// [`Command`] for checking whether a [`Rental`] received its code.
///
/// Once a [`Code`] is delivered, the [`Rental`] is completed and billed.
/// Checking a [`Rental`] which is not active anymore returns it unchanged.
#[derive(Clone, Copy, Debug)]
pub struct CheckRental {
    /// ID of the [`Rental`] to check.
    pub rental_id: rental::Id,

    /// ID of the [`User`] owning the [`Rental`].
    pub user_id: user::Id,
}

impl<Db, Ld, Pr> Command<CheckRental> for Service<Db, Ld, Pr>
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
    Ld: Ledger<Commit<Capture>, Ok = Money, Err = Traced<ledger::Error>>
        + Ledger<Debit<Charge>, Ok = Money, Err = Traced<ledger::Error>>,
    Pr: Provider<
        Select<By<ActivationStatus, ExternalId>>,
        Ok = ActivationStatus,
        Err = Traced<provider::Error>,
    >,
{
    type Ok = Rental;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: CheckRental) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let CheckRental { rental_id, user_id } = cmd;

        let mut rental = self
            .database()
            .execute(Select(By::<Option<Rental>, _>::new(rental_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .filter(|r| r.user_id == user_id)
            .ok_or(E::RentalNotExists(rental_id))
            .map_err(tracerr::wrap!())?;

        if !rental.is_active() {
            return Ok(rental);
        }

        let Some(code) = self.fetch_code(&rental).await else {
            return Ok(rental);
        };

        if self
            .complete(&rental, code.clone())
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        {
            rental.settle(Outcome::Completed(code));
            Ok(rental)
        } else {
            // Settled concurrently, so re-read the actual state.
            self.database()
                .execute(Select(By::<Option<Rental>, _>::new(rental_id)))
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?
                .ok_or(E::RentalNotExists(rental_id))
                .map_err(tracerr::wrap!())
        }
    }
}

/// Error of [`CheckRental`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Rental`] with the provided ID does not exist.
    #[display("`Rental(id: {_0})` does not exist")]
    #[from(ignore)]
    RentalNotExists(#[error(not(source))] rental::Id),
}
