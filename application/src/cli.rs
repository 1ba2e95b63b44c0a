//! Execution of the command line [`Command`]s.

use std::future::IntoFuture as _;

use common::operations::Perform;
use itertools::Itertools as _;
use service::{
    command::{CancelRental, CheckRental, PurchaseRental},
    domain::{rental, user, Rental},
    query,
    task::SweepExpiredRentals,
    Command as _,
};
use tokio::sync::broadcast::error::RecvError;
use tracing as log;

use crate::{args::Command, AsError, Context, Error, Service};

/// Executes the provided [`Command`] in the provided [`Context`], printing
/// its result to the standard output.
///
/// # Errors
///
/// Errors if the [`Command`] fails. The returned [`Error`] carries the exit
/// status of the process.
pub async fn execute(ctx: &Context, cmd: Command) -> Result<(), Error> {
    let svc = ctx.service();

    match cmd {
        Command::Quotes => {
            let quotes = svc
                .execute(query::quote::All)
                .await
                .map_err(AsError::into_error)?;
            for quote in quotes
                .values()
                .sorted_by(|a, b| a.service.cmp(&b.service))
            {
                println!(
                    "{}\t{}\t{}\t{} available",
                    quote.service, quote.name, quote.price, quote.available,
                );
            }
        }
        Command::Purchase { service, id } => {
            let rental_id = id.unwrap_or_else(rental::Id::new);
            log::debug!("purchasing `Rental(id: {rental_id})`");
            let rental = svc
                .execute(PurchaseRental {
                    rental_id,
                    user_id: ctx.current_session().await?.user_id,
                    service,
                })
                .await
                .map_err(AsError::into_error)?;
            print_rental(&rental);
        }
        Command::Check { rental_id } => {
            let rental = svc
                .execute(CheckRental {
                    rental_id,
                    user_id: ctx.current_session().await?.user_id,
                })
                .await
                .map_err(AsError::into_error)?;
            print_rental(&rental);
        }
        Command::Cancel { rental_id } => {
            let cancelled = svc
                .execute(CancelRental {
                    rental_id,
                    user_id: ctx.current_session().await?.user_id,
                })
                .await
                .map_err(AsError::into_error)?;
            if cancelled {
                println!("{rental_id}\tCANCELLED");
            } else {
                println!("{rental_id}\tNOT_ACTIVE");
            }
        }
        Command::Rentals => {
            let user_id = ctx.current_session().await?.user_id;
            let rentals = svc
                .execute(query::rental::ByUser::by(user_id))
                .await
                .map_err(AsError::into_error)?;
            for rental in &rentals {
                print_rental(rental);
            }
        }
        Command::Balance => {
            let user_id = ctx.current_session().await?.user_id;
            let balance = svc
                .execute(query::wallet::Balance::by(user_id))
                .await
                .map_err(AsError::into_error)?;
            println!("{balance}");
        }
        Command::Sweep => {
            let user_id = ctx.current_session().await?.user_id;
            let report = SweepExpiredRentals::new(svc.clone(), user_id)
                .execute(Perform(()))
                .await
                .map_err(AsError::into_error)?;
            println!("{report}");
            if report.failed > 0 {
                return Err(Error::internal(&format!(
                    "{} expired rentals could not be cancelled",
                    report.failed,
                )));
            }
        }
        Command::Watch => {
            watch(svc, ctx.current_session().await?.user_id).await?;
        }
    }

    Ok(())
}

/// Reconciles [`Rental`]s of the user with the provided [`user::Id`] and
/// prints balance changes until interrupted.
async fn watch(svc: &Service, user_id: user::Id) -> Result<(), Error> {
    let mut changes = svc.balance_changes();
    let background = svc.watch(user_id);
    log::info!("watching rentals of `User(id: {user_id})`");

    let balances = async {
        loop {
            match changes.recv().await {
                Ok(change) if change.user_id == user_id => {
                    println!("BALANCE\t{}", change.balance);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("skipped {skipped} balance changes");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        res = background.into_future() => res.map_err(|e| Error::internal(&e)),
        () = balances => Ok(()),
        res = tokio::signal::ctrl_c() => {
            log::info!("interrupted, stopping");
            res.map_err(|e| Error::internal(&e))
        }
    }
}

/// Prints the provided [`Rental`] as a single tab-separated line.
fn print_rental(rental: &Rental) {
    println!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        rental.id,
        rental.service_name,
        rental.phone_number,
        rental.status,
        rental.price,
        rental
            .code
            .as_ref()
            .map_or_else(|| "-".to_owned(), ToString::to_string),
    );
}
