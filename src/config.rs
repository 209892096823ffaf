use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Runtime settings, read from `WAITLIST_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub lock_timeout: Duration,
    pub reaper_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// JSON availability snapshot feeding the oracle. Without one every book
    /// reads as no copies and no predictions.
    pub oracle_file: Option<PathBuf>,
    pub oracle_reload_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_millis(5000),
            reaper_interval: Duration::from_secs(60),
            compact_threshold: 1000,
            metrics_port: None,
            oracle_file: None,
            oracle_reload_interval: Duration::from_secs(30),
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring invalid {key}={raw:?}");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Missing or malformed values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("WAITLIST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_timeout: parse::<u64>(&lookup, "WAITLIST_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            reaper_interval: parse::<u64>(&lookup, "WAITLIST_REAPER_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            compact_threshold: parse(&lookup, "WAITLIST_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse(&lookup, "WAITLIST_METRICS_PORT"),
            oracle_file: lookup("WAITLIST_ORACLE_FILE").map(PathBuf::from),
            oracle_reload_interval: parse::<u64>(&lookup, "WAITLIST_ORACLE_RELOAD_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.oracle_reload_interval),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
