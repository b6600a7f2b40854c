//! Runtime configuration read from the environment (and `.env` via dotenvy)

use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::models::zone::BiddingZone;
use crate::services::entsoe_api::DEFAULT_BASE_URL;
use crate::services::sync_status::intervals;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_REBUILD_INTERVAL: &str = "REBUILD_INTERVAL_SECS";
pub const ENV_REBUILD_DRY_RUN: &str = "REBUILD_DRY_RUN";
pub const ENV_MAX_PARALLEL_ZONES: &str = "MAX_PARALLEL_ZONES";
pub const ENV_RETRY_ATTEMPTS: &str = "STORE_RETRY_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "STORE_RETRY_BASE_DELAY_MS";
pub const ENV_STORE_DAILY: &str = "STORE_DAILY_SUMMARIES";
pub const ENV_DRILLDOWN_TTL: &str = "DRILLDOWN_CACHE_TTL_SECS";
pub const ENV_ENTSOE_TOKEN: &str = "ENTSOE_API_TOKEN";
pub const ENV_ENTSOE_BASE_URL: &str = "ENTSOE_BASE_URL";
pub const ENV_ENTSOE_ZONES: &str = "ENTSOE_ZONES";
pub const ENV_INGEST_INTERVAL: &str = "INGEST_INTERVAL_SECS";
pub const ENV_INGEST_LOOKBACK_DAYS: &str = "INGEST_LOOKBACK_DAYS";

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_REBUILD_INTERVAL_SECS: u64 = intervals::SUMMARY_REBUILD as u64;
pub const DEFAULT_INGEST_INTERVAL_SECS: u64 = intervals::INTERVAL_INGEST as u64;
/// Publication delays of actual generation reach several weeks
pub const DEFAULT_INGEST_LOOKBACK_DAYS: i64 = 31;
pub const DEFAULT_MAX_PARALLEL_ZONES: usize = 8;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_DRILLDOWN_TTL_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Knobs of the summary rebuild batch
#[derive(Debug, Clone, PartialEq)]
pub struct RebuildConfig {
    pub max_parallel_zones: usize,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    /// Persist daily rows too; otherwise drill-downs read intervals
    pub store_daily: bool,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            max_parallel_zones: DEFAULT_MAX_PARALLEL_ZONES,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            store_daily: false,
        }
    }
}

/// Pulling from the ENTSO-E web API. Disabled without a token.
#[derive(Debug, Clone, PartialEq)]
pub struct EntsoeConfig {
    pub api_token: Option<String>,
    pub base_url: String,
    pub zones: Vec<BiddingZone>,
    pub ingest_interval: Duration,
    pub lookback_days: i64,
}

impl Default for EntsoeConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            zones: BiddingZone::ALL.to_vec(),
            ingest_interval: Duration::from_secs(DEFAULT_INGEST_INTERVAL_SECS),
            lookback_days: DEFAULT_INGEST_LOOKBACK_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub rebuild_interval: Duration,
    pub rebuild_dry_run: bool,
    pub rebuild: RebuildConfig,
    pub drilldown_cache_ttl: Duration,
    pub entsoe: EntsoeConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup(ENV_DATABASE_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_DATABASE_URL))?;

        let max_parallel_zones: usize =
            parse_or(&lookup, ENV_MAX_PARALLEL_ZONES, DEFAULT_MAX_PARALLEL_ZONES)?;
        if max_parallel_zones == 0 {
            return Err(ConfigError::Invalid {
                name: ENV_MAX_PARALLEL_ZONES,
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url,
            bind_addr: lookup(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            rebuild_interval: Duration::from_secs(parse_or(
                &lookup,
                ENV_REBUILD_INTERVAL,
                DEFAULT_REBUILD_INTERVAL_SECS,
            )?),
            rebuild_dry_run: parse_flag(&lookup, ENV_REBUILD_DRY_RUN)?,
            rebuild: RebuildConfig {
                max_parallel_zones,
                retry_attempts: parse_or(&lookup, ENV_RETRY_ATTEMPTS, DEFAULT_RETRY_ATTEMPTS)?,
                retry_base_delay: Duration::from_millis(parse_or(
                    &lookup,
                    ENV_RETRY_BASE_DELAY_MS,
                    DEFAULT_RETRY_BASE_DELAY_MS,
                )?),
                store_daily: parse_flag(&lookup, ENV_STORE_DAILY)?,
            },
            drilldown_cache_ttl: Duration::from_secs(parse_or(
                &lookup,
                ENV_DRILLDOWN_TTL,
                DEFAULT_DRILLDOWN_TTL_SECS,
            )?),
            entsoe: entsoe_config(&lookup)?,
        })
    }
}

fn entsoe_config<F>(lookup: &F) -> Result<EntsoeConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookback_days: i64 = parse_or(lookup, ENV_INGEST_LOOKBACK_DAYS, DEFAULT_INGEST_LOOKBACK_DAYS)?;
    if lookback_days <= 0 {
        return Err(ConfigError::Invalid {
            name: ENV_INGEST_LOOKBACK_DAYS,
            value: lookback_days.to_string(),
        });
    }

    // comma-separated zone codes; every zone when unset
    let zones = match lookup(ENV_ENTSOE_ZONES).filter(|v| !v.trim().is_empty()) {
        None => BiddingZone::ALL.to_vec(),
        Some(raw) => raw
            .split(',')
            .filter(|code| !code.trim().is_empty())
            .map(|code| {
                code.parse::<BiddingZone>().map_err(|_| ConfigError::Invalid {
                    name: ENV_ENTSOE_ZONES,
                    value: code.trim().to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(EntsoeConfig {
        api_token: lookup(ENV_ENTSOE_TOKEN).filter(|v| !v.trim().is_empty()),
        base_url: lookup(ENV_ENTSOE_BASE_URL)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        zones,
        ingest_interval: Duration::from_secs(parse_or(
            lookup,
            ENV_INGEST_INTERVAL,
            DEFAULT_INGEST_INTERVAL_SECS,
        )?),
        lookback_days,
    })
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

fn parse_flag<F>(lookup: &F, name: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|v| v.trim().to_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "" | "false" | "0" | "no" => Ok(false),
            "true" | "1" | "yes" => Ok(true),
            _ => Err(ConfigError::Invalid { name, value: v }),
        },
    }
}
