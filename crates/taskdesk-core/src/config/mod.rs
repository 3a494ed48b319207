//! Runtime settings for the cache and sync engine.
//!
//! `SyncSettings` carries every tunable the engine reads: the remote endpoint,
//! the server TTL it mirrors, freshness windows, scheduler cadence and the
//! local quota. Values come from `TASKDESK_*` environment variables with
//! defaults matching the hosted deployment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, DAY_MS};

const DEFAULT_TTL_DAYS: &str = "3";
const DEFAULT_USER_FRESHNESS_SECS: &str = "300";
const DEFAULT_SYNC_INTERVAL_SECS: &str = "120";
const DEFAULT_FORCE_SYNC_SECS: &str = "1800";
const DEFAULT_RETENTION_DAYS: &str = "90";
const DEFAULT_REQUEST_TIMEOUT_SECS: &str = "10";
const DEFAULT_CAPACITY_BYTES: &str = "5242880";
const DEFAULT_PASSWORD: &str = "123123";
const OFFLINE_WARNING_DAYS: u64 = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Remote action endpoint, without trailing slash
    pub api_url: String,
    /// Server-side TTL for task rows
    pub ttl_days: u32,
    /// Window after which the users snapshot is stale
    pub user_freshness: Duration,
    /// Background scheduler tick
    pub sync_interval: Duration,
    /// Maximum age of the last sync before a tick forces a cycle
    pub force_sync_after: Duration,
    /// Age beyond which local tasks may be evicted under quota pressure
    pub local_retention: Duration,
    pub request_timeout: Duration,
    /// No sync for this long flags the device as offline too long
    pub offline_warning: Duration,
    /// Local store quota; `None` is unbounded
    pub capacity_bytes: Option<u64>,
    /// Credential given to new users and on password reset
    pub default_password: String,
}

impl fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("api_url", &self.api_url)
            .field("ttl_days", &self.ttl_days)
            .field("user_freshness", &self.user_freshness)
            .field("sync_interval", &self.sync_interval)
            .field("force_sync_after", &self.force_sync_after)
            .field("local_retention", &self.local_retention)
            .field("request_timeout", &self.request_timeout)
            .field("offline_warning", &self.offline_warning)
            .field("capacity_bytes", &self.capacity_bytes)
            .field("default_password", &"[REDACTED]")
            .finish()
    }
}

impl SyncSettings {
    /// Default settings against the given endpoint.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: trim_trailing(&api_url.into()).to_string(),
            ttl_days: 3,
            user_freshness: Duration::from_secs(300),
            sync_interval: Duration::from_secs(120),
            force_sync_after: Duration::from_secs(1_800),
            local_retention: Duration::from_secs(90 * 86_400),
            request_timeout: Duration::from_secs(10),
            offline_warning: Duration::from_secs(OFFLINE_WARNING_DAYS * 86_400),
            capacity_bytes: Some(5 * 1024 * 1024),
            default_password: DEFAULT_PASSWORD.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = required_trimmed(&lookup, "TASKDESK_API_URL")?;
        if !is_http_url(&api_url) {
            return Err(ConfigError::Invalid(
                "TASKDESK_API_URL must start with http:// or https://".to_string(),
            ));
        }

        let ttl_days = parse_in_range::<u32>(&lookup, "TASKDESK_TTL_DAYS", DEFAULT_TTL_DAYS, 1, 365)?;
        let user_freshness_secs = parse_in_range::<u64>(
            &lookup,
            "TASKDESK_USER_FRESHNESS_SECS",
            DEFAULT_USER_FRESHNESS_SECS,
            0,
            86_400,
        )?;
        let sync_interval_secs = parse_in_range::<u64>(
            &lookup,
            "TASKDESK_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL_SECS,
            10,
            86_400,
        )?;
        let force_sync_secs = parse_in_range::<u64>(
            &lookup,
            "TASKDESK_FORCE_SYNC_SECS",
            DEFAULT_FORCE_SYNC_SECS,
            0,
            7 * 86_400,
        )?;
        let retention_days = parse_in_range::<u64>(
            &lookup,
            "TASKDESK_RETENTION_DAYS",
            DEFAULT_RETENTION_DAYS,
            1,
            3_650,
        )?;
        let request_timeout_secs = parse_in_range::<u64>(
            &lookup,
            "TASKDESK_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1,
            120,
        )?;
        let capacity_bytes = parse_in_range::<u64>(
            &lookup,
            "TASKDESK_CAPACITY_BYTES",
            DEFAULT_CAPACITY_BYTES,
            0,
            u64::MAX,
        )?;
        let default_password = value_or_default(&lookup, "TASKDESK_DEFAULT_PASSWORD", DEFAULT_PASSWORD);

        Ok(Self {
            api_url: trim_trailing(&api_url).to_string(),
            ttl_days,
            user_freshness: Duration::from_secs(user_freshness_secs),
            sync_interval: Duration::from_secs(sync_interval_secs),
            force_sync_after: Duration::from_secs(force_sync_secs),
            local_retention: Duration::from_secs(retention_days * 86_400),
            request_timeout: Duration::from_secs(request_timeout_secs),
            offline_warning: Duration::from_secs(OFFLINE_WARNING_DAYS * 86_400),
            capacity_bytes: (capacity_bytes > 0).then_some(capacity_bytes),
            default_password,
        })
    }

    /// Server TTL in milliseconds.
    pub fn ttl_ms(&self) -> i64 {
        i64::from(self.ttl_days) * DAY_MS
    }
}

/// Whole milliseconds of a duration, saturating at `i64::MAX`.
pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn parse_in_range<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display + Copy,
{
    let value = value_or_default(lookup, name, default)
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]")))?;
    if value < min || value > max {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn trim_trailing(value: &str) -> &str {
    value.trim_end_matches('/')
}
