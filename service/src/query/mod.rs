//! [`Query`] definition.

pub mod quote;
pub mod rental;
pub mod wallet;

use common::operations::{By, Select};
use tracerr::Traced;

use crate::{
    infra::{database, ledger, Database, Ledger},
    Service,
};

/// [`Query`] of the [`Service`].
pub use common::Handler as Query;

/// [`Query`] [`Select`]ing a `T`ype from a [`Database`].
#[derive(Clone, Copy, Debug)]
#[expect(clippy::module_name_repetitions, reason = "more readable")]
pub struct DatabaseQuery<T>(T);

impl<W, B> DatabaseQuery<By<W, B>> {
    /// Creates a new [`DatabaseQuery`] selecting a `W` by the provided `B`.
    #[must_use]
    pub fn by(by: B) -> Self {
        Self(By::new(by))
    }
}

impl<Db, Ld, Pr, W, B> Query<DatabaseQuery<By<W, B>>> for Service<Db, Ld, Pr>
where
    Db: Database<Select<By<W, B>>, Ok = W, Err = Traced<database::Error>>,
{
    type Ok = W;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        DatabaseQuery(by): DatabaseQuery<By<W, B>>,
    ) -> Result<Self::Ok, Self::Err> {
        self.database()
            .execute(Select(by))
            .await
            .map_err(tracerr::wrap!())
    }
}

/// [`Query`] [`Select`]ing a `T`ype from a [`Ledger`].
#[derive(Clone, Copy, Debug)]
#[expect(clippy::module_name_repetitions, reason = "more readable")]
pub struct LedgerQuery<T>(T);

impl<W, B> LedgerQuery<By<W, B>> {
    /// Creates a new [`LedgerQuery`] selecting a `W` by the provided `B`.
    #[must_use]
    pub fn by(by: B) -> Self {
        Self(By::new(by))
    }
}

impl<Db, Ld, Pr, W, B> Query<LedgerQuery<By<W, B>>> for Service<Db, Ld, Pr>
where
    Ld: Ledger<Select<By<W, B>>, Ok = W, Err = Traced<ledger::Error>>,
{
    type Ok = W;
    type Err = Traced<ledger::Error>;

    async fn execute(
        &self,
        LedgerQuery(by): LedgerQuery<By<W, B>>,
    ) -> Result<Self::Ok, Self::Err> {
        self.ledger()
            .execute(Select(by))
            .await
            .map_err(tracerr::wrap!())
    }
}
