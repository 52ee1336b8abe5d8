use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

pub const MIN_REMINDER_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REMINDER_INTERVAL_SECS: u64 = 120;
pub const MAX_PUSH_BATCH_SIZE: usize = 500;
pub const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStoreKind {
    /// Structured device table with a legacy-token fallback.
    Table,
    /// Only the single token stored on the user or driver account.
    Legacy,
}

impl FromStr for DeviceStoreKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown device store {other}, expected table/legacy")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other}, expected compact/json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub reminder_interval: Duration,
    pub push_batch_size: usize,
    pub device_store: DeviceStoreKind,
    pub fcm_endpoint: String,
    pub fcm_server_key: Option<String>,
    pub push_timeout: Duration,
    pub pos_failure_lookback_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            event_buffer_size: 1024,
            reminder_interval: Duration::from_secs(DEFAULT_REMINDER_INTERVAL_SECS),
            push_batch_size: MAX_PUSH_BATCH_SIZE,
            device_store: DeviceStoreKind::Table,
            fcm_endpoint: DEFAULT_FCM_ENDPOINT.to_string(),
            fcm_server_key: None,
            push_timeout: Duration::from_secs(10),
            pos_failure_lookback_days: 7,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let reminder_secs: u64 =
            parse_or_default("REMINDER_INTERVAL_SECS", DEFAULT_REMINDER_INTERVAL_SECS)?;
        let batch_size: usize = parse_or_default("PUSH_BATCH_SIZE", MAX_PUSH_BATCH_SIZE)?;

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            reminder_interval: reminder_interval(reminder_secs),
            push_batch_size: clamp_batch_size(batch_size),
            device_store: parse_or_default("DEVICE_STORE", DeviceStoreKind::Table)?,
            fcm_endpoint: env::var("FCM_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_FCM_ENDPOINT.to_string()),
            fcm_server_key: env::var("FCM_SERVER_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            push_timeout: Duration::from_secs(parse_or_default("PUSH_TIMEOUT_SECS", 10)?),
            pos_failure_lookback_days: parse_or_default("POS_FAILURE_LOOKBACK_DAYS", 7)?,
        })
    }
}

/// Applies the scheduler floor; anything faster than 30s is raised to it.
pub fn reminder_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.max(MIN_REMINDER_INTERVAL_SECS))
}

pub fn clamp_batch_size(size: usize) -> usize {
    size.clamp(1, MAX_PUSH_BATCH_SIZE)
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{clamp_batch_size, reminder_interval, DeviceStoreKind, LogFormat};

    #[test]
    fn reminder_interval_never_drops_below_floor() {
        assert_eq!(reminder_interval(5), Duration::from_secs(30));
        assert_eq!(reminder_interval(120), Duration::from_secs(120));
    }

    #[test]
    fn batch_size_is_capped_at_provider_limit() {
        assert_eq!(clamp_batch_size(0), 1);
        assert_eq!(clamp_batch_size(10_000), 500);
        assert_eq!(clamp_batch_size(50), 50);
    }

    #[test]
    fn device_store_and_log_format_parse_case_insensitively() {
        assert_eq!("TABLE".parse::<DeviceStoreKind>(), Ok(DeviceStoreKind::Table));
        assert_eq!(" legacy ".parse::<DeviceStoreKind>(), Ok(DeviceStoreKind::Legacy));
        assert!("redis".parse::<DeviceStoreKind>().is_err());
        assert_eq!("Json".parse::<LogFormat>(), Ok(LogFormat::Json));
    }
}
