//! [`Command`] definition.

pub mod authorize_user_session;
pub mod cancel_rental;
pub mod check_rental;
pub mod purchase_rental;

/// [`Command`] of the [`Service`].
///
/// [`Service`]: crate::Service
pub use common::Handler as Command;

pub use self::{
    authorize_user_session::AuthorizeUserSession, cancel_rental::CancelRental,
    check_rental::CheckRental, purchase_rental::PurchaseRental,
};
