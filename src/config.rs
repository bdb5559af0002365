use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::location::provider::{Accuracy, Backend, WatchOptions};
use crate::location::strategy::{AcquireOptions, MIN_FALLBACK_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub fix_max_age_ms: u64,
    pub fix_fast_timeout_ms: u64,
    pub fix_fallback_timeout_ms: u64,
    pub watch_distance_filter_m: f64,
    pub watch_interval_ms: u64,
    pub watch_fastest_interval_ms: u64,
    pub average_speed_kmh: f64,
    pub event_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            fix_max_age_ms: 120_000,
            fix_fast_timeout_ms: 12_000,
            fix_fallback_timeout_ms: 15_000,
            watch_distance_filter_m: 10.0,
            watch_interval_ms: 5_000,
            watch_fastest_interval_ms: 3_000,
            average_speed_kmh: 15.0,
            event_buffer_size: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("compact") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "invalid LOG_FORMAT: {other}, expected compact/json"
                )));
            }
        };

        let average_speed_kmh: f64 =
            parse_or_default(&lookup, "AVERAGE_SPEED_KMH", defaults.average_speed_kmh)?;
        if average_speed_kmh <= 0.0 {
            return Err(AppError::Config("AVERAGE_SPEED_KMH must be > 0".to_string()));
        }

        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            fix_max_age_ms: parse_or_default(&lookup, "FIX_MAX_AGE_MS", defaults.fix_max_age_ms)?,
            fix_fast_timeout_ms: parse_or_default(
                &lookup,
                "FIX_FAST_TIMEOUT_MS",
                defaults.fix_fast_timeout_ms,
            )?,
            fix_fallback_timeout_ms: parse_or_default(
                &lookup,
                "FIX_FALLBACK_TIMEOUT_MS",
                defaults.fix_fallback_timeout_ms,
            )?,
            watch_distance_filter_m: parse_or_default(
                &lookup,
                "WATCH_DISTANCE_FILTER_M",
                defaults.watch_distance_filter_m,
            )?,
            watch_interval_ms: parse_or_default(
                &lookup,
                "WATCH_INTERVAL_MS",
                defaults.watch_interval_ms,
            )?,
            watch_fastest_interval_ms: parse_or_default(
                &lookup,
                "WATCH_FASTEST_INTERVAL_MS",
                defaults.watch_fastest_interval_ms,
            )?,
            average_speed_kmh,
            event_buffer_size: parse_or_default(
                &lookup,
                "EVENT_BUFFER_SIZE",
                defaults.event_buffer_size,
            )?,
        })
    }

    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            max_age: Duration::from_millis(self.fix_max_age_ms),
            fast_timeout: Duration::from_millis(self.fix_fast_timeout_ms),
            fallback_timeout: Duration::from_millis(self.fix_fallback_timeout_ms)
                .max(MIN_FALLBACK_TIMEOUT),
            ..AcquireOptions::default()
        }
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            accuracy: Accuracy::High,
            distance_filter_m: self.watch_distance_filter_m,
            interval: Duration::from_millis(self.watch_interval_ms),
            fastest_interval: Duration::from_millis(self.watch_fastest_interval_ms),
            backend: Backend::Default,
        }
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}
