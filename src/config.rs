// Settings come from the environment (optionally a .env file) and can be
// overridden per invocation from the command line.

use crate::blockchain::worker_pool::{window_fits, MAX_HEIGHT, MAX_SCAN_WINDOW};
use crate::blockchain::{RetryPolicy, ScanConfig};
use crate::models::ChainId;
use dotenv::dotenv;
use reqwest::Url;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("Start height {start} is above end height {end}")]
    EmptyRange { start: u64, end: u64 },

    #[error(
        "Scan window {start}..={end} is too large (at most {max_window} heights, ending at or below {max_height})"
    )]
    WindowTooLarge {
        start: u64,
        end: u64,
        max_window: u64,
        max_height: u64,
    },

    #[error("Retry base delay {base:?} exceeds the cap {cap:?}")]
    RetryBounds { base: Duration, cap: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub chain_id: Option<String>,
    pub rpc_endpoints: Vec<String>,
    pub start_height: Option<u64>,
    pub end_height: Option<u64>,
    pub scan_workers: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub rpc_timeout_secs: u64,
    pub rpc_rate_limit: Option<u32>,
    pub use_event_segments: bool,
    pub allow_unfinalized: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable source; unset variables take defaults,
    /// set-but-unparseable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").unwrap_or_else(|| "sqlite:bridge.db".to_string());
        let chain_id = var("CHAIN_ID");
        let rpc_endpoints = var("RPC_ENDPOINTS")
            .map(|v| split_endpoints(&v))
            .unwrap_or_default();
        let start_height = parse_opt("START_HEIGHT", var("START_HEIGHT"))?;
        let end_height = parse_opt("END_HEIGHT", var("END_HEIGHT"))?;
        let scan_workers = parse_opt("SCAN_WORKERS", var("SCAN_WORKERS"))?.unwrap_or_else(num_cpus::get);
        let retry_base = parse_opt("RETRY_BASE_MS", var("RETRY_BASE_MS"))?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(500));
        let retry_max = parse_opt("RETRY_MAX_MS", var("RETRY_MAX_MS"))?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(30));
        let rpc_timeout_secs = parse_opt("RPC_TIMEOUT_SECS", var("RPC_TIMEOUT_SECS"))?.unwrap_or(30);
        let rpc_rate_limit = parse_opt("RPC_RATE_LIMIT", var("RPC_RATE_LIMIT"))?;
        let use_event_segments = parse_bool("USE_EVENT_SEGMENTS", var("USE_EVENT_SEGMENTS"))?;
        let allow_unfinalized = parse_bool("ALLOW_UNFINALIZED", var("ALLOW_UNFINALIZED"))?;

        Ok(Self {
            database_url,
            chain_id,
            rpc_endpoints,
            start_height,
            end_height,
            scan_workers,
            retry_base,
            retry_max,
            rpc_timeout_secs,
            rpc_rate_limit,
            use_event_segments,
            allow_unfinalized,
        })
    }

    /// Validated endpoint URLs, in preference order.
    pub fn endpoint_urls(&self) -> Result<Vec<Url>, ConfigError> {
        if self.rpc_endpoints.is_empty() {
            return Err(ConfigError::Missing("RPC_ENDPOINTS"));
        }
        self.rpc_endpoints
            .iter()
            .map(|raw| {
                Url::parse(raw)
                    .ok()
                    .filter(|url| matches!(url.scheme(), "http" | "https"))
                    .ok_or_else(|| ConfigError::Invalid {
                        name: "RPC_ENDPOINTS",
                        value: raw.clone(),
                    })
            })
            .collect()
    }

    /// Everything the scanner needs, or the first missing/invalid setting.
    pub fn scan_config(&self) -> Result<ScanConfig, ConfigError> {
        let chain = self
            .chain_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(ConfigError::Missing("CHAIN_ID"))?;
        let start = self.start_height.ok_or(ConfigError::Missing("START_HEIGHT"))?;
        let end = self.end_height.ok_or(ConfigError::Missing("END_HEIGHT"))?;
        if start > end {
            return Err(ConfigError::EmptyRange { start, end });
        }
        if !window_fits(start, end) {
            return Err(ConfigError::WindowTooLarge {
                start,
                end,
                max_window: MAX_SCAN_WINDOW,
                max_height: MAX_HEIGHT,
            });
        }
        if self.scan_workers == 0 {
            return Err(ConfigError::Invalid {
                name: "SCAN_WORKERS",
                value: "0".to_string(),
            });
        }
        if self.retry_base.is_zero() || self.retry_base > self.retry_max {
            return Err(ConfigError::RetryBounds {
                base: self.retry_base,
                cap: self.retry_max,
            });
        }

        Ok(ScanConfig {
            chain: ChainId::new(chain),
            start,
            end,
            worker_count: self.scan_workers,
            use_segments: self.use_event_segments,
            allow_unfinalized: self.allow_unfinalized,
            retry: RetryPolicy::unbounded(self.retry_base, self.retry_max),
        })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

fn split_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_opt<T: FromStr>(name: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::Invalid { name, value: v.clone() })
        })
        .transpose()
}

fn parse_bool(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value: v }),
        },
    }
}
