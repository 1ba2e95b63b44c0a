//! [`Config`]-related definitions.

use std::time;

use common::{Currency, Percent};
use config::{builder::DefaultState, ConfigBuilder, ConfigError};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use service::{infra::provider::sms_activate, task};
use smart_default::SmartDefault;

/// Application configuration.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    /// Authentication configuration.
    pub auth: Auth,

    /// Phone number provider configuration.
    pub provider: Provider,

    /// Postgres configuration.
    pub postgres: Postgres,

    /// Service configuration.
    pub service: Service,

    /// Log configuration.
    pub log: Log,
}

impl Config {
    /// Creates a new [`Config`] by:
    /// - loading it from the provided `path` (if any);
    /// - merging it with the environment variables (if any);
    /// - using default values for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(path: impl AsRef<str>) -> Result<Self, ConfigError> {
        ConfigBuilder::<DefaultState>::default()
            .add_source(config::File::with_name(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("CONF").separator("."))
            .build()?
            .try_deserialize()
    }

    /// Builds a [`service::Config`] out of this [`Config`].
    ///
    /// # Errors
    ///
    /// Errors if the configured price drift is not a valid [`Percent`].
    pub fn service(&self) -> Result<service::Config, ConfigError> {
        let Service {
            currency: _,
            rental_ttl,
            max_price_drift,
            quote_ttl,
            refund_retry_delay,
            tasks:
                Tasks {
                    sweep_expired_rentals,
                    poll_rentals,
                },
        } = &self.service;

        let max_price_drift =
            Percent::new(*max_price_drift).ok_or_else(|| {
                ConfigError::Message(format!(
                    "`service.max_price_drift` must be within 0..=100, \
                     got {max_price_drift}",
                ))
            })?;

        Ok(service::Config {
            jwt_decoding_key: jsonwebtoken::DecodingKey::from_secret(
                self.auth.jwt_secret.as_bytes(),
            ),
            rental_ttl: *rental_ttl,
            max_price_drift,
            quote_ttl: *quote_ttl,
            refund_retry_delay: *refund_retry_delay,
            sweep_expired_rentals: task::sweep_expired_rentals::Config {
                interval: sweep_expired_rentals.interval,
            },
            poll_rentals: task::poll_rentals::Config {
                backoff: poll_rentals
                    .backoff
                    .iter()
                    .map(|d| d.into_inner())
                    .collect(),
                refresh: poll_rentals.refresh,
            },
        })
    }

    /// Builds a [`sms_activate::Config`] out of this [`Config`].
    #[must_use]
    pub fn provider(&self) -> sms_activate::Config {
        let Provider {
            base_url,
            api_key,
            country,
            timeout,
        } = self.provider.clone();

        sms_activate::Config {
            base_url,
            api_key,
            country,
            currency: self.service.currency,
            timeout,
        }
    }
}

/// Authentication configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Auth {
    /// [JWT] secret the access tokens are signed with.
    ///
    /// [JWT]: https://wikipedia.org/wiki/JSON_Web_Token
    #[default("secret".to_owned())]
    pub jwt_secret: String,

    /// Access token of the user session, if not passed explicitly.
    pub token: Option<String>,
}

/// Phone number provider configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Provider {
    /// URL of the provider API endpoint.
    #[default("https://api.sms-activate.org/stubs/handler_api.php".to_owned())]
    pub base_url: String,

    /// API key of the provider account.
    #[default(SecretString::from(""))]
    pub api_key: SecretString,

    /// Country to rent phone numbers in.
    pub country: Option<u16>,

    /// Timeout of a single request to the provider.
    #[default(time::Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub timeout: time::Duration,
}

/// Service configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Service {
    /// [`Currency`] wallets and the provider account are kept in.
    #[default(Currency::Usd)]
    pub currency: Currency,

    /// Validity window of a rented number, used when the provider doesn't
    /// report one.
    #[default(time::Duration::from_secs(15 * 60))]
    #[serde(with = "humantime_serde")]
    pub rental_ttl: time::Duration,

    /// Allowed provider price drift between quoting and renting, in percents.
    #[default(Decimal::TEN)]
    pub max_price_drift: Decimal,

    /// Time a fetched price list stays fresh.
    #[default(time::Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub quote_ttl: time::Duration,

    /// Delay before retrying a rejected refund.
    #[default(time::Duration::from_millis(500))]
    #[serde(with = "humantime_serde")]
    pub refund_retry_delay: time::Duration,

    /// Service tasks configuration.
    pub tasks: Tasks,
}

/// Service tasks configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Tasks {
    /// `SweepExpiredRentals` task configuration.
    pub sweep_expired_rentals: SweepTask,

    /// `PollRentals` task configuration.
    pub poll_rentals: PollTask,
}

/// `SweepExpiredRentals` task configuration.
#[derive(Clone, Copy, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct SweepTask {
    /// Interval between sweeps.
    #[default(time::Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub interval: time::Duration,
}

/// `PollRentals` task configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct PollTask {
    /// Delays between consecutive checks of a rental.
    #[default(
        [3, 5, 8, 12]
            .map(|s| time::Duration::from_secs(s).into())
            .to_vec()
    )]
    pub backoff: Vec<humantime_serde::Serde<time::Duration>>,

    /// Interval between refreshes of the polled rentals.
    #[default(time::Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub refresh: time::Duration,
}

/// Postgres configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Postgres {
    /// Host to connect to.
    #[default("127.0.0.1".to_owned())]
    pub host: String,

    /// Port to connect to.
    #[default(5432)]
    pub port: u16,

    /// User to connect as.
    #[default("postgres".to_owned())]
    pub user: String,

    /// Password to connect with.
    #[default("postgres".to_owned())]
    pub password: String,

    /// Database name to connect to.
    #[default("postgres".to_owned())]
    pub dbname: String,
}

impl From<Postgres> for service::infra::postgres::Config {
    fn from(value: Postgres) -> Self {
        let Postgres {
            host,
            port,
            user,
            password,
            dbname,
        } = value;

        Self {
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            dbname: Some(dbname),
            ..Self::default()
        }
    }
}

/// Log configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Log {
    /// Log level.
    pub level: LogLevel,
}

/// Log level.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    /// Designates very low priority, often extremely verbose, information.
    Trace,

    /// Designates lower priority information.
    Debug,

    /// Designates useful information.
    #[default]
    Info,

    /// Designates hazardous situations.
    Warn,

    /// Designates very serious errors.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}
