//! [`Context`]-related definitions.

use service::{
    command::{self, Command as _},
    domain::user::{session, Session},
};
use tokio::sync::OnceCell;

use crate::{error::Failure, AsError, Error, Service};

/// Context a single command line invocation is executed in.
#[derive(Debug)]
pub struct Context {
    /// [`Service`] instance.
    service: Service,

    /// Access token provided by the user, if any.
    token: Option<session::Token>,

    /// Current [`Session`].
    current_session: OnceCell<Session>,
}

impl Context {
    /// Creates a new [`Context`] out of the provided [`Service`] and access
    /// `token`.
    #[must_use]
    pub fn new(service: Service, token: Option<String>) -> Self {
        Self {
            service,
            token: token.map(session::Token::from),
            current_session: OnceCell::new(),
        }
    }

    /// Returns [`Service`] instance of this [`Context`].
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Returns the current [`Session`] for this [`Context`].
    ///
    /// # Errors
    ///
    /// Errors if:
    /// - no access token is provided;
    /// - the provided access token is invalid or expired.
    pub async fn current_session(&self) -> Result<Session, Error> {
        self.current_session
            .get_or_try_init(|| self.do_authentication())
            .await
            .copied()
    }

    /// Performs the [`Session`] authentication.
    async fn do_authentication(&self) -> Result<Session, Error> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| Error::from(Failure::Unauthenticated))?;
        self.service
            .execute(command::AuthorizeUserSession { token })
            .await
            .map_err(AsError::into_error)
    }
}
