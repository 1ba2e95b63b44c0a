use std::{io, process::ExitCode, sync::OnceLock};

use application::{cli, AsError as _, Args, Config, Context, Error, Service};
use service::infra::{postgres, provider::SmsActivate, Postgres};
use tracing as log;
use tracing_subscriber::{
    filter::filter_fn,
    layer::{Layer as _, SubscriberExt as _},
    util::SubscriberInitExt as _,
};

const STDERR_LEVELS: &[log::Level] = &[log::Level::WARN, log::Level::ERROR];

static LOG_LEVEL: OnceLock<log::Level> = OnceLock::new();

postgres::embed_migrations!("../migrations");

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_thread_names(true)
                .with_writer(io::stdout)
                .with_filter(filter_fn(|meta| {
                    meta.is_span()
                        || (!STDERR_LEVELS.contains(meta.level()))
                            && LOG_LEVEL
                                .get()
                                .copied()
                                .unwrap_or(log::Level::INFO)
                                >= *meta.level()
                })),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_thread_names(true)
                .with_writer(io::stderr)
                .with_filter(filter_fn(|meta| {
                    meta.is_span()
                        || (STDERR_LEVELS.contains(meta.level()))
                            && LOG_LEVEL
                                .get()
                                .copied()
                                .unwrap_or(log::Level::INFO)
                                >= *meta.level()
                })),
        )
        .init();

    match start().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            e.exit_code()
        }
    }
}

async fn start() -> Result<(), Error> {
    let Args {
        config,
        token,
        command,
    } = Args::parse().unwrap_or_else(|e| e.exit());

    let config = Config::new(config).map_err(|e| {
        Error::internal(&format!("failed to load `Config`: {e}"))
    })?;

    LOG_LEVEL
        .set(config.log.level.into())
        .unwrap_or_else(|_| unreachable!("first initialization"));

    let service_config = config.service().map_err(|e| {
        Error::internal(&format!("invalid `Config`: {e}"))
    })?;

    let mut postgres =
        Postgres::new(&config.postgres.clone().into(), config.service.currency)
            .map_err(|e| {
                log::error!("failed to initialize `Postgres` client");
                e.into_error()
            })?;

    migrations::runner()
        .run_async(&mut postgres)
        .await
        .map_err(|e| {
            Error::internal(&format!("failed to run database migrations: {e}"))
        })?;

    let provider = SmsActivate::new(config.provider()).map_err(|e| {
        log::error!("failed to initialize `SmsActivate` client");
        e.into_error()
    })?;

    let service =
        Service::new(service_config, postgres.clone(), postgres, provider);
    let context = Context::new(service, token.or(config.auth.token));

    cli::execute(&context, command).await
}
