use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

use crate::engine::EngineSettings;
use crate::model::Ms;

/// Service configuration, read from `SLOTWISE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub utc_offset: FixedOffset,
    pub payment_window: Duration,
    pub reaper_interval: Duration,
    pub rule_read_timeout: Duration,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid value {:?} for {}", self.value, self.key)
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError { key, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let offset_minutes: i32 = parsed(&lookup, "SLOTWISE_UTC_OFFSET_MINUTES", 0)?;
        let utc_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError {
                key: "SLOTWISE_UTC_OFFSET_MINUTES",
                value: offset_minutes.to_string(),
            })?;
        let metrics_port = match lookup("SLOTWISE_METRICS_PORT") {
            None => None,
            Some(value) => Some(value.trim().parse().map_err(|_| ConfigError {
                key: "SLOTWISE_METRICS_PORT",
                value,
            })?),
        };
        let payment_window_secs: u64 = parsed(&lookup, "SLOTWISE_PAYMENT_WINDOW_SECS", 900)?;
        if payment_window_secs == 0 {
            return Err(ConfigError {
                key: "SLOTWISE_PAYMENT_WINDOW_SECS",
                value: "0".into(),
            });
        }
        let reaper_interval_secs: u64 = parsed(&lookup, "SLOTWISE_REAPER_INTERVAL_SECS", 5)?;
        if reaper_interval_secs == 0 {
            return Err(ConfigError {
                key: "SLOTWISE_REAPER_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        Ok(Self {
            bind: lookup("SLOTWISE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "SLOTWISE_PORT", 8080)?,
            data_dir: PathBuf::from(
                lookup("SLOTWISE_DATA_DIR").unwrap_or_else(|| "./data".into()),
            ),
            metrics_port,
            compact_threshold: parsed(&lookup, "SLOTWISE_COMPACT_THRESHOLD", 1000)?,
            utc_offset,
            payment_window: Duration::from_secs(payment_window_secs),
            reaper_interval: Duration::from_secs(reaper_interval_secs),
            rule_read_timeout: Duration::from_millis(parsed(
                &lookup,
                "SLOTWISE_RULE_READ_TIMEOUT_MS",
                2000,
            )?),
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            utc_offset: self.utc_offset,
            payment_window_ms: self.payment_window.as_millis() as Ms,
            rule_read_timeout: self.rule_read_timeout,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotwise.wal")
    }
}
