//! [`Command`] for purchasing a [`Rental`].

use std::cmp::Ordering;

use common::{
    operations::{By, Cancel, Insert, Refund, Rent, Reserve, Select},
    DateTime, Money,
};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

#[cfg(doc)]
use crate::domain::User;
use crate::{
    domain::{
        quote::Quote,
        rental::{self, ExternalId, ServiceCode, Status},
        user,
        wallet::{
            Hold, HoldStatus, RefundReason, Release, Reservation, Reserved,
        },
        Rental,
    },
    infra::{
        database, ledger,
        provider::{self, Number, Order},
        Database, Ledger, Provider,
    },
    query::{self, Query},
    saga::Compensation,
    Service,
};

use super::Command;

/// [`Command`] for purchasing a [`Rental`].
///
/// Reserves the billed price in the wallet, rents a phone number from the
/// [`Provider`] and persists the [`Rental`]. If any step after the
/// reservation fails, the reservation is refunded before the error is
/// returned.
///
/// The [`rental::Id`] is the idempotency key of the purchase: retrying it
/// returns the already purchased [`Rental`] and never reserves twice.
#[derive(Clone, Debug)]
pub struct PurchaseRental {
    /// ID of the [`Rental`] to purchase, generated once by the caller.
    pub rental_id: rental::Id,

    /// ID of the [`User`] purchasing the [`Rental`].
    pub user_id: user::Id,

    /// [`ServiceCode`] to rent a phone number for.
    pub service: ServiceCode,
}

impl<Db, Ld, Pr> Command<PurchaseRental> for Service<Db, Ld, Pr>
where
    Db: Database<Insert<Rental>, Ok = (), Err = Traced<database::Error>>
        + Database<
            Select<By<Option<Rental>, rental::Id>>,
            Ok = Option<Rental>,
            Err = Traced<database::Error>,
        >,
    Ld: Ledger<
            Select<By<Money, user::Id>>,
            Ok = Money,
            Err = Traced<ledger::Error>,
        > + Ledger<
            Select<By<Option<Hold>, rental::Id>>,
            Ok = Option<Hold>,
            Err = Traced<ledger::Error>,
        > + Ledger<
            Reserve<Reservation>,
            Ok = Reserved,
            Err = Traced<ledger::Error>,
        >
        + Ledger<Refund<Release>, Ok = Money, Err = Traced<ledger::Error>>,
    Pr: Provider<Rent<Order>, Ok = Number, Err = Traced<provider::Error>>
        + Provider<
            Cancel<ExternalId>,
            Ok = bool,
            Err = Traced<provider::Error>,
        >,
    Self: Query<
        query::quote::ByService,
        Ok = Option<Quote>,
        Err = Traced<provider::Error>,
    >,
{
    type Ok = Rental;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: PurchaseRental,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let PurchaseRental {
            rental_id,
            user_id,
            service,
        } = cmd;

        if let Some(existing) = self
            .database()
            .execute(Select(By::<Option<Rental>, _>::new(rental_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        {
            if existing.user_id != user_id {
                return Err(tracerr::new!(E::RentalExists(rental_id)));
            }
            log::debug!("`Rental(id: {rental_id})` is purchased already");
            return Ok(existing);
        }

        // Balance is never cached, as it's changed outside of this process.
        let balance = self
            .ledger()
            .execute(Select(By::<Money, _>::new(user_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        if !balance.is_positive() {
            return Err(tracerr::new!(E::InsufficientFunds(balance)));
        }

        let quote = self
            .execute(query::quote::ByService(service.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .filter(Quote::is_available)
            .ok_or_else(|| E::ServiceUnavailable(service.clone()))
            .map_err(tracerr::wrap!())?;

        if balance.partial_cmp(&quote.price).map_or(true, Ordering::is_lt) {
            return Err(tracerr::new!(E::InsufficientFunds(balance)));
        }

        // Settled hold belongs to an unwound attempt, never resumed.
        if let Some(hold) = self
            .ledger()
            .execute(Select(By::<Option<Hold>, _>::new(rental_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
            .filter(|h| h.status != HoldStatus::Reserved)
        {
            return Err(tracerr::new!(E::Ledger(ledger::Error::HoldSettled(
                hold.id,
            ))));
        }

        let reserved = self
            .ledger()
            .execute(Reserve(Reservation {
                user_id,
                amount: quote.price,
                reference: rental_id,
            }))
            .await
            .map_err(|e| {
                if let ledger::Error::InsufficientFunds { balance, .. } =
                    e.as_ref()
                {
                    tracerr::new!(E::InsufficientFunds(*balance))
                } else {
                    tracerr::map_from_and_wrap!(=> E)(e)
                }
            })?;
        self.notify_balance(user_id, reserved.balance);
        log::debug!(
            "reserved {} for `Rental(id: {rental_id})` in `Hold(id: {})`",
            quote.price,
            reserved.hold_id,
        );

        let rented = self
            .provider()
            .execute(Rent(Order {
                service: service.clone(),
                max_price: quote.max_price(self.config().max_price_drift),
            }))
            .await;
        let number = match rented {
            Ok(number) => number,
            Err(e) => {
                _ = Compensation::RefundHold
                    .run(
                        rental_id,
                        self.refund(
                            user_id,
                            reserved.hold_id,
                            RefundReason::ProviderRejected,
                        ),
                    )
                    .await;
                return Err(tracerr::map_from_and_wrap!(=> E)(e));
            }
        };

        let now = DateTime::now();
        let ttl = number
            .ttl
            .or(quote.ttl)
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or(self.config().rental_ttl);
        let rental = Rental {
            id: rental_id,
            user_id,
            external_id: number.external_id,
            service,
            service_name: quote.name,
            phone_number: number.phone_number,
            original_price: quote.original_price,
            price: quote.price,
            status: Status::Active,
            code: None,
            created_at: now.coerce(),
            expires_at: (now + ttl).coerce(),
            hold_id: Some(reserved.hold_id),
        };

        if let Err(e) = self.database().execute(Insert(rental.clone())).await {
            _ = Compensation::RefundHold
                .run(
                    rental_id,
                    self.refund(
                        user_id,
                        reserved.hold_id,
                        RefundReason::PersistenceFailed,
                    ),
                )
                .await;
            _ = Compensation::ReleaseNumber
                .run(rental_id, self.cancel_number(&rental.external_id))
                .await;
            return Err(tracerr::map_from_and_wrap!(=> E)(e));
        }

        log::info!(
            "`Rental(id: {rental_id})` of `{}` number {} is purchased for {}",
            rental.service,
            rental.phone_number,
            rental.price,
        );

        Ok(rental)
    }
}

/// Error of [`PurchaseRental`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// Wallet balance doesn't cover the price.
    #[display("Insufficient funds: {_0} available")]
    #[from(ignore)]
    InsufficientFunds(#[error(not(source))] Money),

    /// [`Ledger`] error.
    #[display("`Ledger` operation failed: {_0}")]
    Ledger(ledger::Error),

    /// [`Provider`] error.
    #[display("`Provider` operation failed: {_0}")]
    Provider(provider::Error),

    /// [`Rental`] with the provided ID is owned by another [`User`].
    #[display("`Rental(id: {_0})` already exists")]
    #[from(ignore)]
    RentalExists(#[error(not(source))] rental::Id),

    /// No phone numbers can be rented for the requested service.
    #[display("`{_0}` service is unavailable")]
    #[from(ignore)]
    ServiceUnavailable(#[error(not(source))] ServiceCode),
}
