//! Service contains the business logic of the application.
//!
//! List of available Cargo features:
#![doc = document_features::document_features!()]
#![deny(
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::all,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![forbid(non_ascii_idents)]
#![warn(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    clippy::pedantic,
    clippy::wildcard_enum_match_arm,
    deprecated_in_future,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    unused_crate_dependencies,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]

pub mod command;
pub mod domain;
pub mod infra;
pub mod query;
mod saga;
pub mod task;

use std::{collections::HashSet, time};

use common::{
    operations::{By, Start},
    Money, Percent,
};
use derive_more::{Debug, Error};
use tokio::sync::broadcast;

#[cfg(doc)]
use infra::{Database, Ledger, Provider};

use self::domain::{rental, user, wallet::BalanceChanged};

pub use self::{command::Command, query::Query, task::Task};

/// Capacity of the [`BalanceChanged`] channel.
///
/// Slow subscribers lagging behind by more notifications than this skip the
/// oldest ones.
const BALANCE_CHANNEL_CAPACITY: usize = 64;

/// [`Service`] configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// [JWT] decoding key.
    ///
    /// [JWT]: https://datatracker.ietf.org/doc/html/rfc7519
    #[debug(skip)]
    pub jwt_decoding_key: jsonwebtoken::DecodingKey,

    /// Validity window of a rented number, used when the provider doesn't
    /// report one.
    pub rental_ttl: time::Duration,

    /// Upper bound of the provider price drift between quoting and renting.
    pub max_price_drift: Percent,

    /// Time a fetched price list stays fresh.
    pub quote_ttl: time::Duration,

    /// Delay before retrying a refund rejected because of an ownership race.
    pub refund_retry_delay: time::Duration,

    /// [`task::SweepExpiredRentals`] configuration.
    pub sweep_expired_rentals: task::sweep_expired_rentals::Config,

    /// [`task::PollRentals`] configuration.
    pub poll_rentals: task::poll_rentals::Config,
}

/// Domain service.
#[derive(Clone, Debug)]
pub struct Service<Db, Ld, Pr> {
    /// Configuration of this [`Service`].
    config: Config,

    /// [`Database`] of this [`Service`].
    database: Db,

    /// [`Ledger`] of this [`Service`].
    ledger: Ld,

    /// [`Provider`] of this [`Service`].
    provider: Pr,

    /// Cached price list of the [`Provider`].
    quotes: query::quote::Cache,

    /// Sender of [`BalanceChanged`] notifications.
    #[debug(skip)]
    balance: broadcast::Sender<BalanceChanged>,

    /// Registry of running [`task::PollRentals`] loops.
    polls: task::poll_rentals::Registry,
}

impl<Db, Ld, Pr> Service<Db, Ld, Pr> {
    /// Creates a new [`Service`] with the provided parameters.
    pub fn new(
        config: Config,
        database: Db,
        ledger: Ld,
        provider: Pr,
    ) -> Self {
        let (balance, _) = broadcast::channel(BALANCE_CHANNEL_CAPACITY);
        Self {
            config,
            database,
            ledger,
            provider,
            quotes: query::quote::Cache::default(),
            balance,
            polls: task::poll_rentals::Registry::default(),
        }
    }

    /// Starts reconciling rentals of the [`User`] with the provided
    /// [`user::Id`] in the returned [`task::Background`]: the
    /// [`task::SweepExpiredRentals`] and [`task::PollRentals`] loops.
    ///
    /// [`User`]: domain::User
    pub fn watch(&self, user_id: user::Id) -> task::Background
    where
        Self: Task<
                Start<By<task::SweepExpiredRentals<Self>, user::Id>>,
                Ok = (),
                Err: Error,
            > + Task<
                Start<By<task::PollRentals<Self>, user::Id>>,
                Ok = (),
                Err: Error,
            > + Clone
            + 'static,
    {
        let mut bg = task::Background::default();

        let svc = self.clone();
        bg.spawn("SweepExpiredRentals", async move {
            svc.execute(Start(
                By::<task::SweepExpiredRentals<Self>, _>::new(user_id),
            ))
            .await
        });

        let svc = self.clone();
        bg.spawn("PollRentals", async move {
            svc.execute(Start(By::<task::PollRentals<Self>, _>::new(user_id)))
                .await
        });

        bg
    }

    /// Returns [`Config`] of this [`Service`].
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns [`Database`] of this [`Service`].
    #[must_use]
    pub fn database(&self) -> &Db {
        &self.database
    }

    /// Returns [`Ledger`] of this [`Service`].
    #[must_use]
    pub fn ledger(&self) -> &Ld {
        &self.ledger
    }

    /// Returns [`Provider`] of this [`Service`].
    #[must_use]
    pub fn provider(&self) -> &Pr {
        &self.provider
    }

    /// Subscribes to [`BalanceChanged`] notifications, published whenever a
    /// wallet balance is changed by this [`Service`].
    #[must_use]
    pub fn balance_changes(&self) -> broadcast::Receiver<BalanceChanged> {
        self.balance.subscribe()
    }

    /// Returns IDs of the rentals currently polled by [`task::PollRentals`].
    #[must_use]
    pub fn polled_rentals(&self) -> HashSet<rental::Id> {
        self.polls.ids()
    }

    /// Publishes the provided wallet `balance` of the [`User`] with the
    /// provided [`user::Id`].
    ///
    /// [`User`]: domain::User
    fn notify_balance(&self, user_id: user::Id, balance: Money) {
        // No subscribers is fine.
        _ = self.balance.send(BalanceChanged { user_id, balance });
    }
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use super::{
        task::{poll_rentals, sweep_expired_rentals},
        Config,
    };

    /// [`Config`] with default values used across unit tests.
    pub(crate) fn config() -> Config {
        Config {
            jwt_decoding_key: jsonwebtoken::DecodingKey::from_secret(b"secret"),
            rental_ttl: Duration::from_secs(15 * 60),
            max_price_drift: "10".parse().unwrap(),
            quote_ttl: Duration::from_secs(30),
            refund_retry_delay: Duration::from_millis(500),
            sweep_expired_rentals: sweep_expired_rentals::Config::default(),
            poll_rentals: poll_rentals::Config::default(),
        }
    }
}
