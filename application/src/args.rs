//! [`Args`] definitions.

use clap::{Parser, Subcommand};
use service::domain::rental::{self, ServiceCode};

/// Broker renting disposable phone numbers for SMS verification.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    /// Access token of the user session.
    ///
    /// Overrides the `auth.token` configuration value.
    #[arg(short, long)]
    pub token: Option<String>,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Parses command line arguments.
    ///
    /// # Errors
    ///
    /// Errors if failed to parse command line arguments.
    pub fn parse() -> Result<Self, clap::Error> {
        <Self as Parser>::try_parse()
    }
}

/// Command of the [`Args`].
#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Rents a phone number for the provided service.
    Purchase {
        /// Code of the service to rent a number for (`tg`, `wa`).
        service: ServiceCode,

        /// ID to purchase the rental under. Repeating a purchase with the
        /// same ID returns the rental purchased before.
        #[arg(long)]
        id: Option<rental::Id>,
    },

    /// Checks whether a verification code has arrived.
    Check {
        /// ID of the rental to check.
        rental_id: rental::Id,
    },

    /// Cancels an active rental and refunds it.
    Cancel {
        /// ID of the rental to cancel.
        rental_id: rental::Id,
    },

    /// Lists rentals, the most recent first.
    Rentals,

    /// Shows the wallet balance.
    Balance,

    /// Lists current prices of the provider services.
    Quotes,

    /// Reconciles expired rentals once.
    Sweep,

    /// Reconciles rentals continuously and reports balance changes until
    /// interrupted.
    Watch,
}
