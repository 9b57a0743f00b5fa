use std::{env, fmt::Display, str::FromStr};

use anyhow::{bail, Context};
use axum::http::HeaderValue;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub production: bool,
    pub auth: AuthConfig,
    /// `None` runs against an in-memory object store.
    pub object_storage: Option<ObjectStorageConfig>,
    pub public_url: String,
    pub allowed_origins: Vec<HeaderValue>,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub dev_login: Option<DevLogin>,
}

#[derive(Clone, Debug)]
pub struct DevLogin {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug)]
pub struct ObjectStorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let env_mode = try_load::<String>("RUST_ENV", "development")?;
        let production = env_mode == "production";

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;

        let object_storage = match env::var("OBJECT_STORAGE_ENDPOINT").ok() {
            Some(endpoint) => Some(ObjectStorageConfig {
                endpoint,
                bucket: required("OBJECT_STORAGE_BUCKET")?,
                region: try_load("OBJECT_STORAGE_REGION", "us-east-1")?,
                access_key_id: required("OBJECT_STORAGE_ACCESS_KEY_ID")?,
                secret_access_key: required("OBJECT_STORAGE_SECRET_ACCESS_KEY")?,
            }),
            None if production => bail!("OBJECT_STORAGE_ENDPOINT must be set in production"),
            None => {
                warn!("OBJECT_STORAGE_ENDPOINT not set, uploads are kept in memory");
                None
            }
        };

        let public_url = match env::var("OBJECT_STORAGE_PUBLIC_URL") {
            Ok(url) => url.trim_end_matches('/').to_string(),
            Err(_) => match &object_storage {
                Some(s) => format!("{}/{}", s.endpoint.trim_end_matches('/'), s.bucket),
                None => "/uploads".to_string(),
            },
        };

        Ok(Self {
            port: try_load("PORT", "8080")?,
            database_path: try_load("DATABASE_PATH", "data/outreach.db")?,
            production,
            auth: AuthConfig {
                jwt_secret,
                issuer: env::var("JWT_ISSUER").ok(),
                audience: env::var("JWT_AUDIENCE").ok(),
                dev_login: load_dev_login(production),
            },
            object_storage,
            public_url,
            allowed_origins: load_origins(production)?,
            rate_limit_per_second: try_load("RATE_LIMIT_PER_SECOND", "50")?,
            rate_limit_burst: try_load("RATE_LIMIT_BURST", "100")?,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid {key} value: {e}"))
}

/// Dev login is only ever enabled outside production, with an explicit
/// opt-in and a non-default password.
fn load_dev_login(production: bool) -> Option<DevLogin> {
    if production || env::var("ALLOW_DEV_LOGIN").unwrap_or_default() != "true" {
        return None;
    }
    let username = env::var("DEV_USERNAME").unwrap_or_else(|_| "admin".to_string());
    let password = env::var("DEV_PASSWORD").unwrap_or_else(|_| "password".to_string());
    if password == "password" {
        warn!("Default DEV_PASSWORD is not allowed, dev login disabled");
        return None;
    }
    Some(DevLogin { username, password })
}

fn load_origins(production: bool) -> anyhow::Result<Vec<HeaderValue>> {
    let origins = parse_origins(&env::var("ALLOWED_ORIGINS").unwrap_or_default());
    if !origins.is_empty() {
        return Ok(origins);
    }
    if production {
        bail!("ALLOWED_ORIGINS must contain at least one valid origin in production");
    }
    Ok(vec![
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ])
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid ALLOWED_ORIGINS entry: {}", trimmed);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_skip_blank_entries() {
        let origins = parse_origins("https://a.org, ,https://b.org");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[1], "https://b.org");
    }
}
