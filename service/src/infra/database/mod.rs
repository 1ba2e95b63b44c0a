//! [`Database`]-related implementations.

#[cfg(feature = "postgres")]
pub mod postgres;

use std::borrow::Cow;

use derive_more::{Display, Error as StdError, From};

#[cfg(feature = "postgres")]
pub use self::postgres::Postgres;

/// Database operation.
pub use common::Handler as Database;

/// [`Database`] error.
#[derive(Debug, Display, From, StdError)]
pub enum Error {
    #[cfg(feature = "postgres")]
    /// [`Postgres`] error.
    Postgres(postgres::Error),

    /// Storage backend rejected the operation.
    #[display("Storage rejected the operation: {_0}")]
    #[from(ignore)]
    Rejected(#[error(not(source))] Cow<'static, str>),
}
