//! Configuration loading from environment variables.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use pastebin_lite_common::Url;

use crate::time::{FIVE_MINUTES, FIVE_SECONDS};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_PATH: &str = "database";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    RocksDb,
    Memory,
}

impl FromStr for Storage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rocksdb" | "rocks" => Ok(Self::RocksDb),
            "memory" | "mem" => Ok(Self::Memory),
            other => bail!("unknown storage backend {:?}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Base for the links handed back on create. Falls back to the request's
    /// `Host` header when unset.
    pub base_url: Option<Url>,
    pub storage: Storage,
    pub db_path: PathBuf,
    pub test_mode: bool,
    /// Upper bound on every store call made on behalf of a request.
    pub store_timeout: Duration,
    /// `None` disables the background sweep.
    pub cleanup_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            base_url: None,
            storage: Storage::RocksDb,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            test_mode: false,
            store_timeout: FIVE_SECONDS,
            cleanup_interval: Some(FIVE_MINUTES),
        }
    }
}

/// Parse a boolean-like flag. Accepts `1/true/yes/on` and `0/false/no/off`
/// or an empty string, case-insensitively.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_var<T>(name: &str, raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {}={:?}: {}", name, value, e))
    })
    .transpose()
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, applying defaults for anything
    /// it does not return.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let port = parse_var::<u16>("PORT", lookup("PORT"))?.unwrap_or(DEFAULT_PORT);

        let base_url = match lookup("BASE_URL").filter(|v| !v.trim().is_empty()) {
            Some(raw) => {
                let url = Url::parse(raw.trim()).with_context(|| format!("invalid BASE_URL={:?}", raw))?;
                if url.cannot_be_a_base() {
                    bail!("BASE_URL {:?} cannot hold paste paths", raw);
                }
                Some(url)
            }
            None => None,
        };

        let test_mode = match lookup("TEST_MODE") {
            Some(raw) => parse_flag(&raw).ok_or_else(|| anyhow!("invalid TEST_MODE={:?}", raw))?,
            None => false,
        };

        let store_timeout = parse_var::<u64>("STORE_TIMEOUT_MS", lookup("STORE_TIMEOUT_MS"))?
            .map_or(defaults.store_timeout, Duration::from_millis);

        let cleanup_interval =
            match parse_var::<u64>("CLEANUP_INTERVAL_SECS", lookup("CLEANUP_INTERVAL_SECS"))? {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.cleanup_interval,
            };

        Ok(Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            base_url,
            storage: parse_var("STORAGE", lookup("STORAGE"))?.unwrap_or(defaults.storage),
            db_path: lookup("DB_PATH").map_or(defaults.db_path, PathBuf::from),
            test_mode,
            store_timeout,
            cleanup_interval,
        })
    }
}
