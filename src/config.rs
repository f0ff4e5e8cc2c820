//! Client configuration
//!
//! Everything is read from environment variables (optionally seeded
//! from a `.env` file). [`Config::from_lookup`] takes any key lookup
//! so the parsing can be exercised without touching the process
//! environment.

use crate::error::{Error, Result};
use crate::reconnect::ReconnectPolicy;
use crate::transport::TlsMode;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Server address and credentials.
#[derive(Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    pub username: String,
    pub password: String,
    /// Skip certificate verification (local bridges with self-signed
    /// certificates).
    pub accept_invalid_certs: bool,
}

impl ImapConfig {
    /// `host:port` as passed to the connector.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// Client-side behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorConfig {
    pub default_folder: String,
    pub page_size: u32,
    pub poll_interval: Duration,
    pub cache_capacity: usize,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            default_folder: "INBOX".to_string(),
            page_size: 50,
            poll_interval: Duration::from_secs(30),
            cache_capacity: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    pub behavior: BehaviorConfig,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_TLS` (`tls`, `starttls` or `none`; default: `tls`)
    /// - `IMAP_PORT` (default: 993 for `tls`, 143 otherwise)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    /// - `BUDGE_DEFAULT_FOLDER` (default: `INBOX`)
    /// - `BUDGE_PAGE_SIZE` (default: `50`)
    /// - `BUDGE_POLL_INTERVAL` in seconds (default: `30`)
    /// - `BUDGE_CACHE_CAPACITY` (default: `100`)
    /// - `BUDGE_RECONNECT_ATTEMPTS` (default: `5`)
    /// - `BUDGE_INITIAL_BACKOFF_MS` (default: `1000`)
    /// - `BUDGE_MAX_BACKOFF_MS` (default: `30000`)
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is
    /// invalid.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build and validate a configuration from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required key is missing or a
    /// value does not parse or validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tls: TlsMode = optional(&lookup, "IMAP_TLS")?.unwrap_or_default();
        let defaults = BehaviorConfig::default();

        let imap = ImapConfig {
            host: lookup("IMAP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: optional(&lookup, "IMAP_PORT")?.unwrap_or_else(|| tls.default_port()),
            tls,
            username: lookup("IMAP_USERNAME")
                .ok_or_else(|| Error::Config("IMAP_USERNAME not set".into()))?,
            password: lookup("IMAP_PASSWORD")
                .ok_or_else(|| Error::Config("IMAP_PASSWORD not set".into()))?,
            accept_invalid_certs: optional_bool(&lookup, "IMAP_ACCEPT_INVALID_CERTS")?
                .unwrap_or(false),
        };

        let behavior = BehaviorConfig {
            default_folder: lookup("BUDGE_DEFAULT_FOLDER").unwrap_or(defaults.default_folder),
            page_size: optional(&lookup, "BUDGE_PAGE_SIZE")?.unwrap_or(defaults.page_size),
            poll_interval: optional(&lookup, "BUDGE_POLL_INTERVAL")?
                .map_or(defaults.poll_interval, Duration::from_secs),
            cache_capacity: optional(&lookup, "BUDGE_CACHE_CAPACITY")?
                .unwrap_or(defaults.cache_capacity),
        };

        let reconnect = ReconnectPolicy::new(
            optional(&lookup, "BUDGE_INITIAL_BACKOFF_MS")?
                .map_or(ReconnectPolicy::DEFAULT_INITIAL_BACKOFF, Duration::from_millis),
            optional(&lookup, "BUDGE_MAX_BACKOFF_MS")?
                .map_or(ReconnectPolicy::DEFAULT_MAX_BACKOFF, Duration::from_millis),
            optional(&lookup, "BUDGE_RECONNECT_ATTEMPTS")?
                .unwrap_or(ReconnectPolicy::DEFAULT_MAX_ATTEMPTS),
        )?;

        let config = Self {
            imap,
            behavior,
            reconnect,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values that cannot be expressed in the types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.imap.host.trim().is_empty() {
            return Err(Error::Config("server host cannot be empty".into()));
        }
        if self.imap.port == 0 {
            return Err(Error::Config("server port must be between 1 and 65535".into()));
        }
        if self.imap.username.is_empty() {
            return Err(Error::Config("credentials username cannot be empty".into()));
        }
        if self.behavior.page_size == 0 {
            return Err(Error::Config("page size must be positive".into()));
        }
        if self.behavior.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".into()));
        }
        if self.behavior.cache_capacity == 0 {
            return Err(Error::Config("cache capacity must be positive".into()));
        }
        Ok(())
    }
}

fn optional<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("Invalid {key}: {e}")))
        })
        .transpose()
}

fn optional_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => Err(Error::Config(format!("Invalid {key}: '{other}' is not a boolean"))),
        })
        .transpose()
}
