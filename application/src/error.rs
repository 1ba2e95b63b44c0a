//! [`Error`]-related definitions.

use std::{fmt, process::ExitCode};

use derive_more::Error as StdError;
use itertools::Itertools as _;
use service::{
    command::{
        authorize_user_session, cancel_rental, check_rental, purchase_rental,
    },
    infra::{database, ledger, provider},
    task::sweep_expired_rentals,
};
use tracerr::{Trace, Traced};

/// Defines a new error type.
#[expect(clippy::module_name_repetitions, reason = "more readable")]
#[macro_export]
macro_rules! define_error {
    (
        enum $name:ident {
            $(
                #[code = $code:literal]
                #[exit = $exit:literal]
                #[message = $message:literal]
                $variant:ident
            ),* $(,)?
        }
    ) => {
        /// Error type.
        #[derive(
            Clone,
            Copy,
            Debug,
            ::derive_more::Display,
            ::derive_more::Error
        )]
        #[repr(u16)]
        pub enum $name {
            $(
                #[display($message)]
                #[doc = $message]
                $variant,
            )*
        }

        impl From<$name> for $crate::Error {
            fn from(err: $name) -> Self {
                match err {
                    $(
                        $name::$variant => Self {
                            code: $code,
                            exit: $exit,
                            message: $message.to_string(),
                            backtrace: None,
                        },
                    )*
                }
            }
        }
    };
}

define_error! {
    enum Failure {
        #[code = "INSUFFICIENT_FUNDS"]
        #[exit = 1]
        #[message = "Insufficient funds"]
        InsufficientFunds,

        #[code = "SERVICE_UNAVAILABLE"]
        #[exit = 2]
        #[message = "Service is unavailable"]
        ServiceUnavailable,

        #[code = "PROVIDER_FAILURE"]
        #[exit = 3]
        #[message = "Phone number provider failed"]
        ProviderFailure,

        #[code = "UNAUTHENTICATED"]
        #[exit = 4]
        #[message = "Authentication is required"]
        Unauthenticated,

        // Exit statuses are fixed to 0..=5, so a missing or foreign rental
        // shares the status of an unauthenticated access. The code tells
        // them apart.
        #[code = "RENTAL_NOT_EXISTS"]
        #[exit = 4]
        #[message = "Rental does not exist"]
        RentalNotExists,
    }
}

/// Application [`Error`] terminating the process.
#[derive(Clone, Debug, StdError)]
pub struct Error {
    /// [`Error`] code.
    pub code: Code,

    /// Process exit status of this [`Error`].
    pub exit: u8,

    /// Backtrace of this [`Error`].
    #[error(not(backtrace))]
    pub backtrace: Option<Trace>,

    /// [`Error`] message.
    pub message: String,
}

impl Error {
    /// Create a new [`Error`] representing an internal failure.
    #[must_use]
    pub fn internal(msg: &impl ToString) -> Self {
        Self {
            code: "INTERNAL_RECONCILIATION_ERROR",
            exit: 5,
            message: msg.to_string(),
            backtrace: None,
        }
    }

    /// Returns the [`ExitCode`] the process should terminate with.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit)
    }

    /// Replaces the message of this [`Error`] with the provided one.
    #[must_use]
    fn with_message(mut self, msg: &impl ToString) -> Self {
        self.message = msg.to_string();
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            code,
            exit: _,
            backtrace,
            message,
        } = self;

        write!(
            f,
            "[{code}]: {message}{}",
            backtrace
                .iter()
                .format_with("\n", |trace, f| f(&format_args!("\n{trace}"))),
        )
    }
}

/// [`Error`] code.
pub type Code = &'static str;

/// Helper trait for converting types into [`Error`]s.
pub trait AsError {
    /// Tries to convert the type into an [`Error`].
    ///
    /// [`None`] is returned if the type cannot be converted into an [`Error`].
    fn try_as_error(&self) -> Option<Error>;

    /// Converts the type into an [`Error`].
    fn as_error(&self) -> Error
    where
        Self: fmt::Display,
    {
        self.try_as_error()
            .unwrap_or_else(|| Error::internal(&self))
    }

    /// Converts the type into an [`Error`] by consuming it.
    fn into_error(self) -> Error
    where
        Self: fmt::Display + Sized,
    {
        self.as_error()
    }
}

impl<E: AsError> AsError for Traced<E> {
    fn try_as_error(&self) -> Option<Error> {
        let mut error = self.as_ref().try_as_error()?;
        error.backtrace = Some(self.trace().clone());
        Some(error)
    }
}

impl AsError for database::Error {
    fn try_as_error(&self) -> Option<Error> {
        None
    }
}

impl AsError for ledger::Error {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::InsufficientFunds { .. } => Some(
                Error::from(Failure::InsufficientFunds).with_message(self),
            ),
            Self::HoldNotFound(_)
            | Self::HoldSettled(_)
            | Self::InvalidAmount(_)
            | Self::Unauthorized
            | Self::Postgres(_) => None,
        }
    }
}

impl AsError for provider::Error {
    fn try_as_error(&self) -> Option<Error> {
        Some(Error::from(Failure::ProviderFailure).with_message(self))
    }
}

impl AsError for authorize_user_session::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        Some(Error::from(Failure::Unauthenticated).with_message(self))
    }
}

impl AsError for purchase_rental::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::InsufficientFunds(_) => Some(
                Error::from(Failure::InsufficientFunds).with_message(self),
            ),
            Self::ServiceUnavailable(_) => Some(
                Error::from(Failure::ServiceUnavailable).with_message(self),
            ),
            Self::RentalExists(_) => Some(
                Error::from(Failure::RentalNotExists).with_message(self),
            ),
            Self::Provider(e) => e.try_as_error(),
            Self::Ledger(e) => e.try_as_error(),
            Self::Db(e) => e.try_as_error(),
        }
    }
}

impl AsError for check_rental::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::RentalNotExists(_) => Some(
                Error::from(Failure::RentalNotExists).with_message(self),
            ),
            Self::Db(e) => e.try_as_error(),
        }
    }
}

impl AsError for cancel_rental::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::RentalNotExists(_) => Some(
                Error::from(Failure::RentalNotExists).with_message(self),
            ),
            Self::Ledger(e) => e.try_as_error(),
            Self::Db(e) => e.try_as_error(),
        }
    }
}

impl AsError for sweep_expired_rentals::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        None
    }
}

#[cfg(test)]
mod spec {
    use common::{Currency, Money};
    use service::{
        command::{authorize_user_session, check_rental, purchase_rental},
        domain::rental::{self, ServiceCode},
        infra::{database, ledger, provider},
    };

    use super::AsError as _;

    #[test]
    fn maps_purchase_failures_to_exit_codes() {
        let usd = |cents| Money::from_minor(cents, Currency::Usd);

        let cases = [
            (purchase_rental::ExecutionError::InsufficientFunds(usd(0)), 1),
            (
                purchase_rental::ExecutionError::ServiceUnavailable(
                    ServiceCode::new("tg").unwrap(),
                ),
                2,
            ),
            (provider::Error::NoNumbers.into(), 3),
            (
                ledger::Error::InsufficientFunds {
                    balance: usd(100),
                    required: usd(200),
                }
                .into(),
                1,
            ),
            (ledger::Error::Unauthorized.into(), 5),
            (database::Error::Rejected("duplicate".into()).into(), 5),
        ];

        for (err, exit) in cases {
            let msg = err.to_string();
            let err = err.into_error();
            assert_eq!(err.exit, exit, "wrong exit status of: {msg}");
        }
    }

    #[test]
    fn keeps_trace_and_message() {
        let traced = tracerr::new!(
            purchase_rental::ExecutionError::InsufficientFunds(
                Money::from_minor(150, Currency::Usd),
            )
        );

        let err = traced.into_error();

        assert_eq!(err.code, "INSUFFICIENT_FUNDS");
        assert!(err.message.contains("1.50USD"), "{}", err.message);
        assert!(err.backtrace.is_some());
        assert!(err.to_string().starts_with("[INSUFFICIENT_FUNDS]: "));
    }

    #[test]
    fn rejected_session_is_unauthenticated() {
        let err = authorize_user_session::ExecutionError::SessionExpired
            .into_error();

        assert_eq!(err.exit, 4);
        assert_eq!(err.code, "UNAUTHENTICATED");
    }

    #[test]
    fn foreign_rental_shares_exit_with_unauthenticated() {
        let rental_id = rental::Id::new();
        let errs = [
            check_rental::ExecutionError::RentalNotExists(rental_id)
                .into_error(),
            purchase_rental::ExecutionError::RentalExists(rental_id)
                .into_error(),
        ];

        for err in errs {
            assert_eq!(err.exit, 4);
            assert_eq!(err.code, "RENTAL_NOT_EXISTS");
            assert!(err.message.contains(&rental_id.to_string()));
        }
    }
}
