//! [`Query`] collection related to wallets.

use common::{operations::By, Money};

use crate::domain::user;
#[cfg(doc)]
use crate::{domain::User, Query};

use super::LedgerQuery;

/// Queries the current wallet balance of a [`User`].
pub type Balance = LedgerQuery<By<Money, user::Id>>;
