//! [`PollRentals`] [`Task`].

use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    error::Error,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time,
};

use common::operations::{By, Perform, Select, Start};
use smart_default::SmartDefault;
use tokio::{
    sync::oneshot,
    task,
    time::{interval, sleep},
};
use tracerr::Traced;
use tracing as log;

#[cfg(doc)]
use crate::domain::User;
use crate::{
    command::{check_rental, CheckRental, Command},
    domain::{rental, user, Rental},
    infra::{database, Database},
    Service,
};

use super::Task;

/// Configuration for [`PollRentals`] [`Task`].
#[derive(Clone, Debug, SmartDefault)]
pub struct Config {
    /// Delays before consecutive checks of a polled [`Rental`].
    ///
    /// The last delay is repeated once all of them are used.
    #[default(vec![
        time::Duration::from_secs(3),
        time::Duration::from_secs(5),
        time::Duration::from_secs(8),
        time::Duration::from_secs(12),
    ])]
    pub backoff: Vec<time::Duration>,

    /// Interval between refreshes of the polled [`Rental`]s set.
    #[default(time::Duration::from_secs(10))]
    pub refresh: time::Duration,
}

impl Config {
    /// Returns the delay before the check number `attempt` (counting from
    /// zero).
    #[must_use]
    pub fn delay(&self, attempt: usize) -> time::Duration {
        self.backoff
            .get(attempt)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(self.refresh)
    }
}

/// [`Task`] polling active [`Rental`]s of a [`User`] for delivered codes.
///
/// Every run [`Reconcile`]s the polling loops with the currently active
/// [`Rental`]s of the [`User`].
#[derive(Clone, Debug)]
pub struct PollRentals<S> {
    /// ID of the [`User`] whose [`Rental`]s are polled.
    user_id: user::Id,

    /// [`Service`] instance.
    service: S,
}

/// Reconciliation of running polling loops with the watched [`Rental`]s.
///
/// Loops are started for watched active [`Rental`]s not polled yet, and
/// stopped for [`Rental`]s which are not watched or not active anymore. An
/// empty watched set stops all the loops.
///
/// Polling loops are spawned onto the current [`task::LocalSet`].
#[derive(Clone, Debug)]
pub struct Reconcile {
    /// ID of the [`User`] owning the watched [`Rental`]s.
    pub user_id: user::Id,

    /// IDs of the watched [`Rental`]s.
    pub watched: Vec<rental::Id>,
}

/// Registry of the running polling loops.
///
/// A loop is stopped by dropping its stop [`oneshot::Sender`], which the loop
/// only observes between checks, so a check is never interrupted half-way
/// through settling a [`Rental`].
#[derive(Clone, Debug, Default)]
pub struct Registry(Arc<Mutex<Loops>>);

/// Running polling loops.
#[derive(Debug, Default)]
struct Loops {
    /// Last issued generation of a loop.
    generation: u64,

    /// Generation and stop signal of a loop per polled [`Rental`].
    running: HashMap<rental::Id, (u64, oneshot::Sender<()>)>,
}

impl Registry {
    /// Returns IDs of the currently polled [`Rental`]s.
    pub(crate) fn ids(&self) -> HashSet<rental::Id> {
        self.lock().running.keys().copied().collect()
    }

    /// Removes the loop of the [`Rental`] with the provided [`rental::Id`],
    /// unless it was replaced by a loop of another generation.
    fn release(&self, rental_id: rental::Id, generation: u64) {
        let mut loops = self.lock();
        if loops
            .running
            .get(&rental_id)
            .is_some_and(|(g, _)| *g == generation)
        {
            _ = loops.running.remove(&rental_id);
        }
    }

    /// Locks the [`Loops`] of this [`Registry`].
    fn lock(&self) -> MutexGuard<'_, Loops> {
        // Loops are plain data, so a poisoned lock is still consistent.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<Db, Ld, Pr> Task<Start<By<PollRentals<Self>, user::Id>>>
    for Service<Db, Ld, Pr>
where
    PollRentals<Self>: Task<Perform<()>, Ok = (), Err: Error> + 'static,
    Self: Clone,
{
    type Ok = ();
    type Err = Infallible;

    async fn execute(
        &self,
        Start(by): Start<By<PollRentals<Self>, user::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let task = PollRentals {
            user_id: by.into_inner(),
            service: self.clone(),
        };

        let mut interval = interval(self.config().poll_rentals.refresh);
        loop {
            _ = interval.tick().await;
            _ = task.execute(Perform(())).await.map_err(|e| {
                log::error!("`task::PollRentals` failed: {e}");
            });
        }
    }
}

impl<Db, Ld, Pr> Task<Perform<()>> for PollRentals<Service<Db, Ld, Pr>>
where
    Db: Database<
        Select<By<Vec<Rental>, user::Id>>,
        Ok = Vec<Rental>,
        Err = Traced<database::Error>,
    >,
    Service<Db, Ld, Pr>:
        Task<Perform<Reconcile>, Ok = (), Err = Traced<database::Error>>,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(&self, _: Perform<()>) -> Result<Self::Ok, Self::Err> {
        let watched = self
            .service
            .database()
            .execute(Select(By::<Vec<Rental>, _>::new(self.user_id)))
            .await
            .map_err(tracerr::wrap!())?
            .into_iter()
            .filter(Rental::is_active)
            .map(|r| r.id)
            .collect();

        self.service
            .execute(Perform(Reconcile {
                user_id: self.user_id,
                watched,
            }))
            .await
            .map_err(tracerr::wrap!())
    }
}

impl<Db, Ld, Pr> Task<Perform<Reconcile>> for Service<Db, Ld, Pr>
where
    Db: Database<
        Select<By<Vec<Rental>, user::Id>>,
        Ok = Vec<Rental>,
        Err = Traced<database::Error>,
    >,
    Self: Command<
            CheckRental,
            Ok = Rental,
            Err = Traced<check_rental::ExecutionError>,
        > + Clone
        + 'static,
{
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Perform(reconcile): Perform<Reconcile>,
    ) -> Result<Self::Ok, Self::Err> {
        let Reconcile { user_id, watched } = reconcile;

        let active = if watched.is_empty() {
            HashSet::new()
        } else {
            let watched = watched.into_iter().collect::<HashSet<_>>();
            self.database()
                .execute(Select(By::<Vec<Rental>, _>::new(user_id)))
                .await
                .map_err(tracerr::wrap!())?
                .into_iter()
                .filter(|r| {
                    r.is_active() && !r.is_expired() && watched.contains(&r.id)
                })
                .map(|r| r.id)
                .collect::<HashSet<_>>()
        };

        let mut loops = self.polls.lock();
        loops.running.retain(|id, _| {
            let keep = active.contains(id);
            if !keep {
                log::debug!("stopping polling of `Rental(id: {id})`");
            }
            keep
        });
        for rental_id in active {
            if loops.running.contains_key(&rental_id) {
                continue;
            }
            loops.generation += 1;
            let generation = loops.generation;
            let (stop_tx, stop_rx) = oneshot::channel();
            _ = task::spawn_local(poll(
                self.clone(),
                CheckRental { rental_id, user_id },
                generation,
                stop_rx,
            ));
            _ = loops.running.insert(rental_id, (generation, stop_tx));
            log::debug!("started polling `Rental(id: {rental_id})`");
        }

        Ok(())
    }
}

/// Polling loop of a single [`Rental`].
///
/// Checks the [`Rental`] with backoff until it stops being active, expires,
/// or the `stop` signal fires. The signal is only awaited along with the
/// backoff delay, so a running check always finishes.
async fn poll<Db, Ld, Pr>(
    service: Service<Db, Ld, Pr>,
    check: CheckRental,
    generation: u64,
    mut stop: oneshot::Receiver<()>,
) where
    Service<Db, Ld, Pr>: Command<
        CheckRental,
        Ok = Rental,
        Err = Traced<check_rental::ExecutionError>,
    >,
{
    let rental_id = check.rental_id;
    for attempt in 0.. {
        tokio::select! {
            biased;
            _ = &mut stop => {
                log::debug!("polling of `Rental(id: {rental_id})` is stopped");
                break;
            }
            () = sleep(service.config().poll_rentals.delay(attempt)) => {}
        }

        match service.execute(check).await {
            Ok(rental) if rental.is_active() && !rental.is_expired() => {}
            Ok(rental) => {
                log::debug!(
                    "`Rental(id: {rental_id})` is {}, polling finished",
                    if rental.is_active() { "expired" } else { "settled" },
                );
                break;
            }
            Err(e) => match e.as_ref() {
                check_rental::ExecutionError::RentalNotExists(_) => {
                    log::warn!("polling of `Rental(id: {rental_id})`: {e}");
                    break;
                }
                check_rental::ExecutionError::Db(_) => {
                    log::warn!(
                        "polling of `Rental(id: {rental_id})` failed, \
                         retrying: {e}",
                    );
                }
            },
        }
    }
    service.polls.release(rental_id, generation);
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use super::Config;

    #[test]
    fn backoff_repeats_last_delay() {
        let config = Config::default();

        let delays = (0..6).map(|n| config.delay(n)).collect::<Vec<_>>();

        assert_eq!(
            delays,
            [3, 5, 8, 12, 12, 12].map(Duration::from_secs).to_vec(),
        );
    }

    #[test]
    fn empty_backoff_falls_back_to_refresh() {
        let config = Config {
            backoff: vec![],
            refresh: Duration::from_secs(7),
        };

        assert_eq!(config.delay(0), Duration::from_secs(7));
    }
}
