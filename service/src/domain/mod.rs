//! Domain definitions.

pub mod quote;
pub mod rental;
pub mod user;
pub mod wallet;

pub use self::{quote::Quote, rental::Rental, user::User};
