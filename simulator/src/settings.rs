use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use atticfan_common::history::{DEFAULT_HISTORY_ROWS, MAX_HISTORY_ROWS};
use tracing::warn;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorSettings {
    pub bind_addr: SocketAddr,
    /// Base URL of a real device. Unsimulated requests go here when set.
    pub device_url: Option<String>,
    pub upstream_timeout: Duration,
    /// Directory holding the dashboard files, served when no device is
    /// configured. The repository ships no dashboard, so point
    /// `ATTICFAN_WEB_ROOT` at one or every unsimulated request is a 404.
    pub web_root: PathBuf,
    /// Rows in the generated history log, at most [`MAX_HISTORY_ROWS`].
    pub history_rows: usize,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_HTTP_PORT),
            device_url: None,
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            web_root: PathBuf::from(format!("{}/web", env!("CARGO_MANIFEST_DIR"))),
            history_rows: DEFAULT_HISTORY_ROWS,
        }
    }
}

impl SimulatorSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let ip = parse_or(&lookup, "ATTICFAN_BIND", defaults.bind_addr.ip());
        let port = parse_or(&lookup, "ATTICFAN_HTTP_PORT", defaults.bind_addr.port());
        let timeout_secs = parse_or(
            &lookup,
            "ATTICFAN_UPSTREAM_TIMEOUT_SECS",
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        );

        Self {
            bind_addr: SocketAddr::new(ip, port),
            device_url: lookup("ATTICFAN_DEVICE_URL")
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            upstream_timeout: Duration::from_secs(timeout_secs),
            web_root: lookup("ATTICFAN_WEB_ROOT")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.web_root),
            history_rows: history_rows(parse_or(
                &lookup,
                "ATTICFAN_HISTORY_ROWS",
                defaults.history_rows,
            )),
        }
    }
}

fn history_rows(requested: usize) -> usize {
    if requested > MAX_HISTORY_ROWS {
        warn!("ATTICFAN_HISTORY_ROWS={requested} is too large, using {MAX_HISTORY_ROWS}");
        return MAX_HISTORY_ROWS;
    }
    requested
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!("ignoring invalid {key}={raw:?}, using {default}");
            default
        }
    }
}
