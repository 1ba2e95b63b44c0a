//! Postgres [`Database`] and [`Ledger`] implementation.

mod impls;

use common::Currency;
use deadpool_postgres::Runtime;
use derive_more::{Display, Error as StdError, From};
use tokio_postgres::{error::SqlState, types::ToSql, NoTls, Row, ToStatement};
use tracerr::Traced;

use crate::infra::database;
#[cfg(doc)]
use crate::infra::{Database, Ledger};

pub use refinery::embed_migrations;

pub use deadpool_postgres::Config;

/// Pooled Postgres client backing both the rentals [`Database`] and the
/// wallet [`Ledger`].
#[derive(Clone, Debug)]
pub struct Postgres {
    /// Pool of connections.
    pool: deadpool_postgres::Pool,

    /// [`Currency`] wallets are kept in.
    currency: Currency,
}

impl Postgres {
    /// Creates a new [`Postgres`] client with the provided [`Config`], keeping
    /// wallets in the provided [`Currency`].
    ///
    /// # Errors
    ///
    /// If failed to create a new [`Postgres`] client.
    pub fn new(
        conf: &Config,
        currency: Currency,
    ) -> Result<Self, Traced<database::Error>> {
        let pool = conf
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;
        Ok(Self { pool, currency })
    }

    /// Retrieves a pooled connection.
    async fn connection(
        &self,
    ) -> Result<deadpool_postgres::Object, Traced<Error>> {
        self.pool
            .get()
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
    }

    /// Queries the provided statement with the given parameters and returns
    /// the resulting rows.
    async fn query<T>(
        &self,
        stmt: &T,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, Traced<database::Error>>
    where
        T: ToStatement + ?Sized,
    {
        self.connection()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> database::Error))?
            .query(stmt, params)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)
    }

    /// Queries the provided statement with the given parameters and returns
    /// the optional resulting row.
    async fn query_opt<T>(
        &self,
        stmt: &T,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, Traced<database::Error>>
    where
        T: ToStatement + ?Sized,
    {
        self.connection()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> database::Error))?
            .query_opt(stmt, params)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)
    }

    /// Executes the provided statement with the given parameters and returns
    /// the number of affected rows.
    async fn exec<T>(
        &self,
        stmt: &T,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, Traced<database::Error>>
    where
        T: ToStatement + ?Sized,
    {
        self.connection()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> database::Error))?
            .execute(stmt, params)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)
    }
}

/// Postgres database [`Error`].
#[derive(Debug, Display, StdError, From)]
pub enum Error {
    /// Connection error.
    #[display("Connection error: {_0}")]
    Connection(tokio_postgres::Error),

    /// Error of creating a new connection pool.
    #[display("Failed to create a new connection pool: {_0}")]
    PoolCreationError(deadpool_postgres::CreatePoolError),

    /// Connection pool error.
    #[display("Connection pool error: {_0}")]
    PoolError(deadpool_postgres::PoolError),
}

impl Error {
    /// Checks if the error is a unique violation of the specified constraint.
    #[must_use]
    pub fn is_unique_violation(&self, constraint: Option<&str>) -> bool {
        match self {
            Self::Connection(e) => {
                e.code() == Some(&SqlState::UNIQUE_VIOLATION)
                    && constraint.map_or(true, |c| {
                        e.as_db_error().and_then(|e| e.constraint()) == Some(c)
                    })
            }
            Self::PoolError(..) | Self::PoolCreationError(..) => false,
        }
    }
}
