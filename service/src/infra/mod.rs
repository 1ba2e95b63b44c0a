//! Infrastructure layer.
//!
//! Collaborators the [`Service`] orchestrates:
//! - [`Database`] storing rentals;
//! - [`Ledger`] owning wallet balances and holds;
//! - [`Provider`] renting phone numbers.
//!
//! [`Service`]: crate::Service

pub mod database;
pub mod ledger;
pub mod provider;

pub use self::{database::Database, ledger::Ledger, provider::Provider};
#[cfg(feature = "postgres")]
pub use self::database::{postgres, Postgres};
