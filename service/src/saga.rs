//! Steps of the rental lifecycle saga shared by [`Command`]s and [`Task`]s.
//!
//! [`Command`]: crate::Command
//! [`Task`]: crate::Task

use std::{fmt, future::Future};

use common::{
    operations::{By, Cancel, Commit, Debit, Refund, Select, Update},
    Money,
};
use derive_more::Display;
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        rental::{self, Code, ExternalId, Outcome, Transition},
        user,
        wallet::{Capture, Charge, Hold, HoldId, RefundReason, Release},
        Rental,
    },
    infra::{
        database, ledger,
        provider::{self, ActivationStatus},
        Database, Ledger, Provider,
    },
    Service,
};

/// Named step undoing a part of a failed rental purchase.
#[derive(Clone, Copy, Debug, Display)]
pub(crate) enum Compensation {
    /// Returns the reserved funds to the wallet.
    #[display("refund hold")]
    RefundHold,

    /// Releases the granted phone number on the provider side.
    #[display("release number")]
    ReleaseNumber,
}

impl Compensation {
    /// Runs this [`Compensation`] step for the [`Rental`] with the provided
    /// [`rental::Id`], logging its outcome.
    ///
    /// [`None`] is returned if the step failed.
    pub(crate) async fn run<T, E>(
        self,
        rental_id: rental::Id,
        step: impl Future<Output = Result<T, E>>,
    ) -> Option<T>
    where
        E: fmt::Display,
    {
        match step.await {
            Ok(ok) => {
                log::info!(
                    "compensation `{self}` of `Rental(id: {rental_id})` \
                     succeeded",
                );
                Some(ok)
            }
            Err(e) => {
                log::error!(
                    "compensation `{self}` of `Rental(id: {rental_id})` \
                     failed: {e}",
                );
                None
            }
        }
    }
}

impl<Db, Ld, Pr> Service<Db, Ld, Pr> {
    /// Asks the [`Provider`] for a [`Code`] delivered to the provided
    /// [`Rental`].
    ///
    /// Any [`Provider`] failure is treated as "no code yet".
    pub(crate) async fn fetch_code(&self, rental: &Rental) -> Option<Code>
    where
        Pr: Provider<
            Select<By<ActivationStatus, ExternalId>>,
            Ok = ActivationStatus,
            Err = Traced<provider::Error>,
        >,
    {
        let status = self
            .provider()
            .execute(Select(By::new(rental.external_id.clone())))
            .await;
        match status {
            Ok(ActivationStatus::CodeDelivered(code)) => Some(code),
            Ok(ActivationStatus::Waiting) => None,
            Ok(ActivationStatus::Cancelled) => {
                log::warn!(
                    "activation of `Rental(id: {})` is cancelled by provider",
                    rental.id,
                );
                None
            }
            Ok(ActivationStatus::Unknown(raw)) => {
                log::warn!(
                    "unknown activation status of `Rental(id: {})`: {raw}",
                    rental.id,
                );
                None
            }
            Err(e) => {
                log::warn!(
                    "failed to fetch activation status of \
                     `Rental(id: {})`: {e}",
                    rental.id,
                );
                None
            }
        }
    }

    /// Cancels the activation with the provided [`ExternalId`] on the
    /// [`Provider`] side.
    pub(crate) async fn cancel_number(
        &self,
        external_id: &ExternalId,
    ) -> Result<(), Traced<provider::Error>>
    where
        Pr: Provider<
            Cancel<ExternalId>,
            Ok = bool,
            Err = Traced<provider::Error>,
        >,
    {
        let cancelled = self
            .provider()
            .execute(Cancel(external_id.clone()))
            .await
            .map_err(tracerr::wrap!())?;
        if cancelled {
            Ok(())
        } else {
            Err(tracerr::new!(provider::Error::Rejected(format!(
                "activation `{external_id}` was not cancelled",
            ))))
        }
    }

    /// Best-effort [`Self::cancel_number()`], only logging a failure.
    pub(crate) async fn release_number(&self, rental: &Rental)
    where
        Pr: Provider<
            Cancel<ExternalId>,
            Ok = bool,
            Err = Traced<provider::Error>,
        >,
    {
        if let Err(e) = self.cancel_number(&rental.external_id).await {
            log::warn!(
                "failed to release number of `Rental(id: {})`: {e}",
                rental.id,
            );
        }
    }

    /// Transitions the provided [`Rental`] into a completed one with the
    /// provided [`Code`], and bills it.
    ///
    /// Billing failures are logged only, as a delivered [`Code`] is never
    /// taken back. Returns whether this call performed the transition.
    pub(crate) async fn complete(
        &self,
        rental: &Rental,
        code: Code,
    ) -> Result<bool, Traced<database::Error>>
    where
        Db: Database<
            Update<Transition>,
            Ok = bool,
            Err = Traced<database::Error>,
        >,
        Ld: Ledger<Commit<Capture>, Ok = Money, Err = Traced<ledger::Error>>
            + Ledger<Debit<Charge>, Ok = Money, Err = Traced<ledger::Error>>,
    {
        let completed = self
            .database()
            .execute(Update(Transition {
                rental_id: rental.id,
                outcome: Outcome::Completed(code),
            }))
            .await
            .map_err(tracerr::wrap!())?;
        if !completed {
            log::debug!("`Rental(id: {})` is settled already", rental.id);
            return Ok(false);
        }

        let billed = match rental.hold_id {
            Some(hold_id) => {
                self.ledger()
                    .execute(Commit(Capture {
                        user_id: rental.user_id,
                        hold_id,
                    }))
                    .await
            }
            None => {
                self.ledger()
                    .execute(Debit(Charge {
                        user_id: rental.user_id,
                        amount: rental.price,
                        reference: rental.id,
                    }))
                    .await
            }
        };
        match billed {
            Ok(balance) => {
                log::info!(
                    "`Rental(id: {})` is completed and billed {}",
                    rental.id,
                    rental.price,
                );
                self.notify_balance(rental.user_id, balance);
            }
            Err(e) => {
                log::error!(
                    "failed to bill completed `Rental(id: {})`: {e}",
                    rental.id,
                );
            }
        }
        Ok(true)
    }

    /// Resolves the [`HoldId`] reserved for the provided [`Rental`].
    ///
    /// Legacy [`Rental`]s not referencing their [`Hold`] are looked up in the
    /// [`Ledger`] by their [`rental::Id`].
    pub(crate) async fn resolve_hold(
        &self,
        rental: &Rental,
    ) -> Result<Option<HoldId>, Traced<ledger::Error>>
    where
        Ld: Ledger<
            Select<By<Option<Hold>, rental::Id>>,
            Ok = Option<Hold>,
            Err = Traced<ledger::Error>,
        >,
    {
        if let Some(id) = rental.hold_id {
            return Ok(Some(id));
        }
        Ok(self
            .ledger()
            .execute(Select(By::new(rental.id)))
            .await
            .map_err(tracerr::wrap!())?
            .map(|hold| hold.id))
    }

    /// Refunds the [`Hold`] with the provided [`HoldId`] once.
    pub(crate) async fn refund(
        &self,
        user_id: user::Id,
        hold_id: HoldId,
        reason: RefundReason,
    ) -> Result<Money, Traced<ledger::Error>>
    where
        Ld: Ledger<Refund<Release>, Ok = Money, Err = Traced<ledger::Error>>,
    {
        let balance = self
            .ledger()
            .execute(Refund(Release {
                user_id,
                hold_id,
                reason,
            }))
            .await
            .map_err(tracerr::wrap!())?;
        self.notify_balance(user_id, balance);
        Ok(balance)
    }

    /// Refunds the [`Hold`] with the provided [`HoldId`], retrying once after
    /// the configured delay if the [`Ledger`] rejects it with a retryable
    /// error.
    pub(crate) async fn refund_with_retry(
        &self,
        user_id: user::Id,
        hold_id: HoldId,
        reason: RefundReason,
    ) -> Result<Money, Traced<ledger::Error>>
    where
        Ld: Ledger<Refund<Release>, Ok = Money, Err = Traced<ledger::Error>>,
    {
        match self.refund(user_id, hold_id, reason).await {
            Err(e) if e.as_ref().is_retryable() => {
                log::warn!("refund of `Hold(id: {hold_id})` is retried: {e}");
                tokio::time::sleep(self.config().refund_retry_delay).await;
                self.refund(user_id, hold_id, reason)
                    .await
                    .map_err(tracerr::wrap!())
            }
            res => res,
        }
    }
}
