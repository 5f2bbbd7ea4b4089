use std::path::PathBuf;
use std::str::FromStr;

use crate::validate::ValidationPolicy;

/// Server settings, read from `ROOMBOOK_*` environment variables.
/// Missing or unparseable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub require_future_start: bool,
    pub require_minute_alignment: bool,
    /// Rooms created at boot if missing.
    pub seed_rooms: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            require_future_start: true,
            require_minute_alignment: true,
            seed_rooms: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|s| parse_bool(&s))
                .unwrap_or(default)
        };

        Self {
            port: parsed(&lookup, "ROOMBOOK_PORT").unwrap_or(defaults.port),
            bind: lookup("ROOMBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_connections: parsed(&lookup, "ROOMBOOK_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "ROOMBOOK_METRICS_PORT"),
            require_future_start: flag("ROOMBOOK_REQUIRE_FUTURE_START", defaults.require_future_start),
            require_minute_alignment: flag(
                "ROOMBOOK_REQUIRE_MINUTE_ALIGNMENT",
                defaults.require_minute_alignment,
            ),
            seed_rooms: lookup("ROOMBOOK_SEED_ROOMS")
                .map(|s| split_names(&s))
                .unwrap_or_default(),
        }
    }

    pub fn policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            require_future_start: self.require_future_start,
            require_minute_alignment: self.require_minute_alignment,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_names(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}
