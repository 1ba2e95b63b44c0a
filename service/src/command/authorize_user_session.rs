//! [`Command`] for authorizing a [`User`].

use derive_more::{Display, Error, From};
use jsonwebtoken::Validation;
use tracerr::Traced;

#[cfg(doc)]
use crate::domain::User;
use crate::{
    domain::user::{session, Session},
    Service,
};

use super::Command;

/// [`Command`] for authorizing a [`User`].
#[derive(Clone, Debug, From)]
pub struct AuthorizeUserSession {
    /// [`Session`] token to authorize.
    pub token: session::Token,
}

impl<Db, Ld, Pr> Command<AuthorizeUserSession> for Service<Db, Ld, Pr> {
    type Ok = Session;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: AuthorizeUserSession,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let AuthorizeUserSession { token } = cmd;

        let session = jsonwebtoken::decode::<Session>(
            token.as_ref(),
            &self.config().jwt_decoding_key,
            &Validation::default(),
        )
        .map_err(tracerr::from_and_wrap!(=> E))?
        .claims;

        if session.expires_at <= session::ExpirationDateTime::now() {
            return Err(tracerr::new!(E::SessionExpired));
        }

        Ok(session)
    }
}

/// Error of [`AuthorizeUserSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`jsonwebtoken`] decoding error.
    #[display("Failed to decode a JSON Web Token: {_0}")]
    JsonWebTokenDecodeError(jsonwebtoken::errors::Error),

    /// [`Session`] has expired already.
    #[display("`Session` has expired")]
    #[from(ignore)]
    SessionExpired,
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::DateTime;
    use jsonwebtoken::{EncodingKey, Header};

    use crate::{
        domain::user::{self, session, Session},
        Command as _,
    };

    use super::{AuthorizeUserSession, ExecutionError};

    type Service = crate::Service<(), (), ()>;

    fn service(secret: &[u8]) -> Service {
        let mut config = crate::spec::config();
        config.jwt_decoding_key =
            jsonwebtoken::DecodingKey::from_secret(secret);
        crate::Service::new(config, (), (), ())
    }

    fn token(secret: &[u8], session: &Session) -> session::Token {
        jsonwebtoken::encode(
            &Header::default(),
            session,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
        .parse()
        .unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_token() {
        let session = Session {
            user_id: user::Id::new(),
            expires_at: (DateTime::now() + Duration::from_secs(3600)).coerce(),
        };

        let authorized = service(b"secret")
            .execute(AuthorizeUserSession {
                token: token(b"secret", &session),
            })
            .await
            .unwrap();

        assert_eq!(authorized.user_id, session.user_id);
    }

    #[tokio::test]
    async fn rejects_foreign_signature() {
        let session = Session {
            user_id: user::Id::new(),
            expires_at: (DateTime::now() + Duration::from_secs(3600)).coerce(),
        };

        let err = service(b"secret")
            .execute(AuthorizeUserSession {
                token: token(b"other", &session),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_ref(),
            ExecutionError::JsonWebTokenDecodeError(_),
        ));
    }
}
