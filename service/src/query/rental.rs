//! [`Query`] collection related to [`Rental`]s.

use common::operations::By;

use crate::domain::{user, Rental};
#[cfg(doc)]
use crate::{domain::User, Query};

use super::DatabaseQuery;

/// Queries all [`Rental`]s of a [`User`], the most recent first.
pub type ByUser = DatabaseQuery<By<Vec<Rental>, user::Id>>;
