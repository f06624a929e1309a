use std::{path::PathBuf, str::FromStr, time::Duration};

use lettre::message::Mailbox;

use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_DAILY_LIMIT: u64 = 300;
const DEFAULT_COUNTER_FILE: &str = "email_count.json";
const DEFAULT_PRIMARY_TIMEOUT_SECS: u64 = 60;
const DEFAULT_FALLBACK_TIMEOUT_SECS: u64 = 10;

// Primary settings also answer to the names used by older Brevo deployments.
const LEGACY_ALIASES: [(&str, &str); 5] = [
    ("PRIMARY_HOST", "BREVO_HOST"),
    ("PRIMARY_PORT", "BREVO_PORT"),
    ("PRIMARY_SECURE", "BREVO_SECURE"),
    ("PRIMARY_USER", "BREVO_USER"),
    ("PRIMARY_PASS", "BREVO_PASS"),
];

/// Which routing rule the relay runs with. Exactly one per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingPolicy {
    /// Primary until the daily limit is reached, then fallback.
    #[default]
    Limit,
    /// Caller picks the provider; the counter is informational only.
    Explicit,
}

impl FromStr for RoutingPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "limit" => Ok(RoutingPolicy::Limit),
            "explicit" => Ok(RoutingPolicy::Explicit),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

/// One outbound SMTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true, STARTTLS otherwise.
    pub secure: bool,
    pub credentials: Option<SmtpCredentials>,
    pub connect_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub daily_limit: u64,
    pub policy: RoutingPolicy,
    pub counter_file: PathBuf,
    pub primary: TransportConfig,
    pub fallback: TransportConfig,
    pub default_from: Option<Mailbox>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get = |key: &str| {
            non_empty(key).or_else(|| {
                LEGACY_ALIASES
                    .iter()
                    .find(|(name, _)| *name == key)
                    .and_then(|(_, alias)| non_empty(alias))
            })
        };

        let primary_secure = parse_or(&get, "PRIMARY_SECURE", false)?;
        let primary = TransportConfig {
            host: get("PRIMARY_HOST").ok_or(ConfigError::Missing("PRIMARY_HOST"))?,
            port: parse_or(&get, "PRIMARY_PORT", if primary_secure { 465 } else { 587 })?,
            secure: primary_secure,
            credentials: credentials(&get, "PRIMARY_USER", "PRIMARY_PASS"),
            connect_timeout: Some(Duration::from_secs(parse_or(
                &get,
                "PRIMARY_TIMEOUT_SECS",
                DEFAULT_PRIMARY_TIMEOUT_SECS,
            )?)),
        };

        let fallback = TransportConfig {
            host: get("FALLBACK_HOST").ok_or(ConfigError::Missing("FALLBACK_HOST"))?,
            port: parse_or(&get, "FALLBACK_PORT", 465)?,
            secure: parse_or(&get, "FALLBACK_SECURE", true)?,
            credentials: credentials(&get, "FALLBACK_USER", "FALLBACK_PASS"),
            connect_timeout: Some(Duration::from_secs(parse_or(
                &get,
                "FALLBACK_TIMEOUT_SECS",
                DEFAULT_FALLBACK_TIMEOUT_SECS,
            )?)),
        };

        Ok(Config {
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            daily_limit: parse_or(&get, "DAILY_LIMIT", DEFAULT_DAILY_LIMIT)?,
            policy: parse_or(&get, "ROUTING_POLICY", RoutingPolicy::default())?,
            counter_file: get("COUNTER_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COUNTER_FILE)),
            primary,
            fallback,
            default_from: get("FROM_EMAIL")
                .map(|v| parse_value("FROM_EMAIL", &v))
                .transpose()?,
        })
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn credentials<G>(get: &G, user_key: &str, pass_key: &str) -> Option<SmtpCredentials>
where
    G: Fn(&str) -> Option<String>,
{
    Some(SmtpCredentials {
        username: get(user_key)?,
        password: get(pass_key)?,
    })
}
