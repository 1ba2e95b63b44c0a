//! Background [`Task`]s definitions.

mod background;
pub mod poll_rentals;
pub mod sweep_expired_rentals;

pub use common::Handler as Task;

pub use self::{
    background::Background,
    poll_rentals::{PollRentals, Reconcile},
    sweep_expired_rentals::{Report, SweepExpiredRentals},
};
