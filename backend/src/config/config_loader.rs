use std::{fmt::Display, str::FromStr};

use anyhow::{Context, Result, anyhow};

use super::config_model::{BackendServer, Database, DotEnvyConfig, Stripe, UserSecret};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

pub fn load_from<F>(lookup: F) -> Result<DotEnvyConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let backend_server = BackendServer {
        port: parsed(&lookup, "SERVER_PORT_BACKEND")?,
        body_limit: parsed(&lookup, "SERVER_BODY_LIMIT")?,
        timeout: parsed(&lookup, "SERVER_TIMEOUT")?,
    };

    let database = Database {
        url: required(&lookup, "DATABASE_URL")?,
        max_connections: parsed_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
        statement_timeout_ms: parsed_or(&lookup, "DATABASE_STATEMENT_TIMEOUT_MS", 5_000)?,
        connection_timeout_secs: parsed_or(&lookup, "DATABASE_CONNECTION_TIMEOUT_SECS", 5)?,
    };

    let stripe = Stripe {
        secret_key: required(&lookup, "STRIPE_SECRET_KEY")?,
        webhook_secret: required(&lookup, "STRIPE_WEBHOOK_SECRET")?,
        success_url: required(&lookup, "STRIPE_SUCCESS_URL")?,
        cancel_url: required(&lookup, "STRIPE_CANCEL_URL")?,
        http_timeout_secs: parsed_or(&lookup, "STRIPE_HTTP_TIMEOUT_SECS", 10)?,
        webhook_tolerance_secs: parsed_or(&lookup, "STRIPE_WEBHOOK_TOLERANCE_SECS", 300)?,
    };

    let user_secret = UserSecret {
        secret: required(&lookup, "JWT_USER_SECRET")?,
    };

    if database.max_connections == 0 {
        return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be at least 1"));
    }

    Ok(DotEnvyConfig {
        backend_server,
        database,
        stripe,
        user_secret,
    })
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("{key} is invalid"))
}

fn parsed<F, T>(lookup: &F, key: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = required(lookup, key)?;
    raw.trim()
        .parse()
        .map_err(|err| anyhow!("{err}"))
        .with_context(|| format!("{key} is invalid"))
}

fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key).filter(|value| !value.trim().is_empty()) {
        None => Ok(default),
        Some(_) => parsed(lookup, key),
    }
}
