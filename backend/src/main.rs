use anyhow::Result;
use backend::axum_http::http_serve;
use backend::config::config_loader;
use crates::infra::db::postgres::postgres_connection::{self, PoolSettings};
use crates::payments::stripe_client::StripeClient;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // No subscriber is installed yet, so this failure can only go to stderr.
    if let Err(error) = crates::observability::init_observability("backend") {
        eprintln!("Backend failed to initialise logging: {error}");
        std::process::exit(1);
    }

    if let Err(error) = run().await {
        error!("Backend exited with error: {}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let dotenvy_env = config_loader::load()?;
    info!("ENV has been loaded");

    let database = &dotenvy_env.database;
    let postgres_pool = postgres_connection::establish_connection(
        &database.url,
        PoolSettings {
            max_connections: database.max_connections,
            connection_timeout: Duration::from_secs(database.connection_timeout_secs),
            statement_timeout_ms: database.statement_timeout_ms,
        },
    )?;
    info!("Postgres connection has been established");

    let stripe = &dotenvy_env.stripe;
    let stripe_client = StripeClient::new(
        stripe.secret_key.clone(),
        stripe.webhook_secret.clone(),
        stripe.success_url.clone(),
        stripe.cancel_url.clone(),
        Duration::from_secs(stripe.http_timeout_secs),
        stripe.webhook_tolerance_secs,
    )?;

    http_serve::start(
        Arc::new(dotenvy_env),
        Arc::new(postgres_pool),
        Arc::new(stripe_client),
    )
    .await?;

    Ok(())
}
