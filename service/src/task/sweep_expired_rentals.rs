//! [`SweepExpiredRentals`] [`Task`].

use std::{convert::Infallible, error::Error, time};

use common::{
    operations::{
        By, Cancel, Commit, Debit, Perform, Refund, Select, Start, Update,
    },
    DateTime, Money,
};
use derive_more::{Display, Error as StdError, From};
use smart_default::SmartDefault;
use tokio::time::interval;
use tracerr::Traced;
use tracing as log;

#[cfg(doc)]
use crate::domain::User;
use crate::{
    domain::{
        rental::{self, ExternalId, Outcome, Transition},
        user,
        wallet::{Capture, Charge, Hold, RefundReason, Release},
        Rental,
    },
    infra::{
        database, ledger,
        provider::{self, ActivationStatus},
        Database, Ledger, Provider,
    },
    Service,
};

use super::Task;

/// Configuration for [`SweepExpiredRentals`] [`Task`].
#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Config {
    /// Interval between sweeps.
    #[default(time::Duration::from_secs(60))]
    pub interval: time::Duration,
}

/// [`Task`] reconciling expired, but still active [`Rental`]s of a [`User`].
///
/// A late [`rental::Code`] is billed, otherwise the [`Rental`] is cancelled
/// and refunded. A [`Rental`] failing to reconcile is force-cancelled, so no
/// [`Rental`] stays active past a single sweep.
#[derive(Clone, Debug)]
pub struct SweepExpiredRentals<S> {
    /// ID of the [`User`] whose [`Rental`]s are swept.
    user_id: user::Id,

    /// [`Service`] instance.
    service: S,
}

impl<S> SweepExpiredRentals<S> {
    /// Creates a new [`SweepExpiredRentals`] [`Task`] sweeping [`Rental`]s of
    /// the [`User`] with the provided [`user::Id`].
    #[must_use]
    pub fn new(service: S, user_id: user::Id) -> Self {
        Self { user_id, service }
    }
}

/// Outcome of a single [`SweepExpiredRentals`] run.
#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq)]
#[display(
    "{completed} completed, {cancelled} cancelled, \
     {force_cancelled} force-cancelled, {failed} failed"
)]
pub struct Report {
    /// Number of [`Rental`]s completed with a late code.
    pub completed: usize,

    /// Number of [`Rental`]s cancelled and refunded.
    pub cancelled: usize,

    /// Number of [`Rental`]s cancelled after a failed reconciliation.
    pub force_cancelled: usize,

    /// Number of [`Rental`]s which could not be cancelled at all.
    pub failed: usize,
}

impl Report {
    /// Indicates whether no [`Rental`]s were swept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Indicates whether any [`Rental`] required the safety net.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.force_cancelled > 0 || self.failed > 0
    }
}

impl<Db, Ld, Pr> Task<Start<By<SweepExpiredRentals<Self>, user::Id>>>
    for Service<Db, Ld, Pr>
where
    SweepExpiredRentals<Self>:
        Task<Perform<()>, Ok = Report, Err: Error> + 'static,
    Self: Clone,
{
    type Ok = ();
    type Err = Infallible;

    async fn execute(
        &self,
        Start(by): Start<By<SweepExpiredRentals<Self>, user::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let task = SweepExpiredRentals::new(self.clone(), by.into_inner());

        let mut interval =
            interval(self.config().sweep_expired_rentals.interval);
        loop {
            _ = interval.tick().await;
            match task.execute(Perform(())).await {
                Ok(report) if report.has_failures() => {
                    log::warn!("`task::SweepExpiredRentals`: {report}");
                }
                Ok(report) if !report.is_empty() => {
                    log::info!("`task::SweepExpiredRentals`: {report}");
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("`task::SweepExpiredRentals` failed: {e}");
                }
            }
        }
    }
}

impl<Db, Ld, Pr> Task<Perform<()>> for SweepExpiredRentals<Service<Db, Ld, Pr>>
where
    Db: Database<
            Select<By<Vec<Rental>, user::Id>>,
            Ok = Vec<Rental>,
            Err = Traced<database::Error>,
        > + Database<
            Select<By<Option<Rental>, rental::Id>>,
            Ok = Option<Rental>,
            Err = Traced<database::Error>,
        > + Database<
            Update<Transition>,
            Ok = bool,
            Err = Traced<database::Error>,
        >,
    Ld: Ledger<Commit<Capture>, Ok = Money, Err = Traced<ledger::Error>>
        + Ledger<Debit<Charge>, Ok = Money, Err = Traced<ledger::Error>>
        + Ledger<
            Select<By<Option<Hold>, rental::Id>>,
            Ok = Option<Hold>,
            Err = Traced<ledger::Error>,
        > + Ledger<Refund<Release>, Ok = Money, Err = Traced<ledger::Error>>,
    Pr: Provider<
            Select<By<ActivationStatus, ExternalId>>,
            Ok = ActivationStatus,
            Err = Traced<provider::Error>,
        > + Provider<
            Cancel<ExternalId>,
            Ok = bool,
            Err = Traced<provider::Error>,
        >,
{
    type Ok = Report;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, _: Perform<()>) -> Result<Self::Ok, Self::Err> {
        let now = DateTime::now();
        let rentals = self
            .service
            .database()
            .execute(Select(By::<Vec<Rental>, _>::new(self.user_id)))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))?;

        let mut report = Report::default();
        for rental in rentals.into_iter().filter(|r| r.is_stale_at(now)) {
            match self.reconcile(&rental).await {
                Ok(Some(Outcome::Completed(_))) => report.completed += 1,
                Ok(Some(Outcome::Cancelled)) => report.cancelled += 1,
                Ok(None) => {}
                Err(e) => {
                    log::error!(
                        "failed to reconcile expired `Rental(id: {})`: {e}",
                        rental.id,
                    );
                    match self.force_cancel(&rental).await {
                        Ok(true) => report.force_cancelled += 1,
                        Ok(false) => {}
                        Err(e) => {
                            log::error!(
                                "failed to force-cancel `Rental(id: {})`: {e}",
                                rental.id,
                            );
                            report.failed += 1;
                        }
                    }
                }
            }
        }
        Ok(report)
    }
}

impl<Db, Ld, Pr> SweepExpiredRentals<Service<Db, Ld, Pr>>
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
        + Ledger<Debit<Charge>, Ok = Money, Err = Traced<ledger::Error>>
        + Ledger<
            Select<By<Option<Hold>, rental::Id>>,
            Ok = Option<Hold>,
            Err = Traced<ledger::Error>,
        > + Ledger<Refund<Release>, Ok = Money, Err = Traced<ledger::Error>>,
    Pr: Provider<
            Select<By<ActivationStatus, ExternalId>>,
            Ok = ActivationStatus,
            Err = Traced<provider::Error>,
        > + Provider<
            Cancel<ExternalId>,
            Ok = bool,
            Err = Traced<provider::Error>,
        >,
{
    /// Re-reads the provided listed [`Rental`], returning it only if it's
    /// still active.
    async fn refresh(
        &self,
        rental: &Rental,
    ) -> Result<Option<Rental>, Traced<database::Error>> {
        Ok(self
            .service
            .database()
            .execute(Select(By::<Option<Rental>, _>::new(rental.id)))
            .await
            .map_err(tracerr::wrap!())?
            .filter(Rental::is_active))
    }

    /// Settles the provided expired [`Rental`].
    ///
    /// Returns the [`Outcome`] applied by this call, or [`None`] if the
    /// [`Rental`] was settled concurrently.
    async fn reconcile(
        &self,
        listed: &Rental,
    ) -> Result<Option<Outcome>, Traced<ExecutionError>> {
        use ExecutionError as E;

        let svc = &self.service;

        // Earlier rentals of the sweep may take a while, so the listed state
        // is stale by now.
        let Some(rental) = self
            .refresh(listed)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        else {
            log::debug!("`Rental(id: {})` is settled already", listed.id);
            return Ok(None);
        };
        let rental = &rental;

        if let Some(code) = svc.fetch_code(rental).await {
            let completed = svc
                .complete(rental, code.clone())
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
            return Ok(completed.then_some(Outcome::Completed(code)));
        }

        svc.release_number(rental).await;

        if let Some(hold_id) = svc
            .resolve_hold(rental)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        {
            _ = svc
                .refund(rental.user_id, hold_id, RefundReason::Expired)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> E))?;
        }

        let cancelled = svc
            .database()
            .execute(Update(Transition {
                rental_id: rental.id,
                outcome: Outcome::Cancelled,
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        Ok(cancelled.then_some(Outcome::Cancelled))
    }

    /// Cancels the provided [`Rental`] after a failed [`Self::reconcile()`],
    /// attempting to refund it first.
    ///
    /// Returns whether this call cancelled the [`Rental`].
    async fn force_cancel(
        &self,
        listed: &Rental,
    ) -> Result<bool, Traced<ExecutionError>> {
        let svc = &self.service;

        let rental = match self.refresh(listed).await {
            Ok(Some(rental)) => rental,
            Ok(None) => return Ok(false),
            Err(e) => {
                log::warn!(
                    "failed to re-read `Rental(id: {})`, force-cancelling \
                     the listed one: {e}",
                    listed.id,
                );
                listed.clone()
            }
        };
        let rental = &rental;

        let refunded = match svc.resolve_hold(rental).await {
            Ok(Some(hold_id)) => svc
                .refund(rental.user_id, hold_id, RefundReason::Expired)
                .await
                .map(drop),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = refunded {
            log::error!(
                "failed to refund force-cancelled `Rental(id: {})`: {e}",
                rental.id,
            );
        }

        svc.database()
            .execute(Update(Transition {
                rental_id: rental.id,
                outcome: Outcome::Cancelled,
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> ExecutionError))
    }
}

/// Error of [`SweepExpiredRentals`] execution.
#[derive(Debug, Display, StdError, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Ledger`] error.
    #[display("`Ledger` operation failed: {_0}")]
    Ledger(ledger::Error),
}
