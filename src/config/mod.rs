//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! API keys and the database URL are wrapped in secrecy::SecretString
//! so they never end up in logs.

pub mod secrets;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use secrecy::SecretString;
use url::Url;

/// Connection details for one media server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL including any URL base, e.g. `http://10.0.0.5:8989/sonarr`.
    pub base_url: Url,
    pub api_key: SecretString,
}

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Series server (legacy hub). `None` disables that bridge.
    pub series: Option<ServerConfig>,
    /// Movie server (modern hub). `None` disables that bridge.
    pub movie: Option<ServerConfig>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// How often the host restarts a dark series bridge. `None` = never.
    pub series_retry: Option<Duration>,
    /// Queue a full movie resync every time the movie hub (re)connects.
    pub movie_resync_on_connect: bool,
    /// TOML file with server-to-local path mappings.
    pub path_mappings: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let series_retry_secs = match std::env::var("SERIES_RETRY_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|_| Error::Config(format!("SERIES_RETRY_SECS is not a number: {raw}")))?,
            Err(_) => 60,
        };

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            series: server_from_env("SERIES")?,
            movie: server_from_env("MOVIE")?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            series_retry: (series_retry_secs > 0).then(|| Duration::from_secs(series_retry_secs)),
            movie_resync_on_connect: flag_var("MOVIE_RESYNC_ON_CONNECT")?,
            path_mappings: std::env::var("PATH_MAPPINGS").ok().map(PathBuf::from),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// `<PREFIX>_URL` and `<PREFIX>_API_KEY` together enable a server; either alone is an error.
fn server_from_env(prefix: &str) -> Result<Option<ServerConfig>> {
    let url_var = format!("{prefix}_URL");
    let key_var = format!("{prefix}_API_KEY");
    match (std::env::var(&url_var).ok(), std::env::var(&key_var).ok()) {
        (None, None) => Ok(None),
        (Some(url), Some(key)) => {
            let base_url = Url::parse(&url)
                .map_err(|e| Error::Config(format!("{url_var} is not a valid URL: {e}")))?;
            Ok(Some(ServerConfig {
                base_url,
                api_key: SecretString::from(key),
            }))
        }
        (Some(_), None) => Err(Error::Config(format!("{url_var} is set but {key_var} is not"))),
        (None, Some(_)) => Err(Error::Config(format!("{key_var} is set but {url_var} is not"))),
    }
}

fn flag_var(name: &str) -> Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(false),
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(Error::Config(format!("{name} is not a boolean: {raw}"))),
        },
    }
}
