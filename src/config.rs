use anyhow::{Context, Result};
use std::time::Duration;
use url::Url;

use crate::services::query_filter::FilterPolicy;
use crate::time::TimeConvention;

pub const DEFAULT_UPSTREAM_URL: &str = "https://deprem.afad.gov.tr/apiv2/event/filter";

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    pub user_agent: String,
    pub cache_ttl: Duration,
    pub cache_sweep_interval: Option<Duration>,
    pub upstream_max_limit: u32,
    pub safe_limit: u32,
    pub default_limit: u32,
    pub default_window_days: u32,
    pub time_convention: TimeConvention,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self> {
        let upstream_url = env_string("SEISMIC_PROXY_UPSTREAM_URL", DEFAULT_UPSTREAM_URL);
        Url::parse(&upstream_url).context("invalid SEISMIC_PROXY_UPSTREAM_URL")?;

        let upstream_timeout =
            Duration::from_millis(env_u64("SEISMIC_PROXY_UPSTREAM_TIMEOUT_MS", 10_000).max(1));
        let user_agent = env_string(
            "SEISMIC_PROXY_USER_AGENT",
            concat!("seismic-proxy/", env!("CARGO_PKG_VERSION")),
        );
        let cache_ttl = Duration::from_secs(env_u64("SEISMIC_PROXY_CACHE_TTL_SECONDS", 120));
        let cache_sweep_interval = match env_u64("SEISMIC_PROXY_CACHE_SWEEP_SECONDS", 60) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let upstream_max_limit = env_u32("SEISMIC_PROXY_UPSTREAM_MAX_LIMIT", 2500).max(1);
        // The proxy cap may never exceed what upstream accepts.
        let safe_limit = env_u32("SEISMIC_PROXY_SAFE_LIMIT", 1000).clamp(1, upstream_max_limit);
        let default_limit = env_u32("SEISMIC_PROXY_DEFAULT_LIMIT", 1000).max(1);
        let default_window_days = env_u32("SEISMIC_PROXY_DEFAULT_WINDOW_DAYS", 7).clamp(1, 365);

        let raw_convention = env_string("SEISMIC_PROXY_UPSTREAM_TIMEZONE", "utc");
        let time_convention = raw_convention.parse::<TimeConvention>().unwrap_or_else(|_| {
            tracing::warn!(
                value = %raw_convention,
                "unknown SEISMIC_PROXY_UPSTREAM_TIMEZONE; using utc"
            );
            TimeConvention::Utc
        });

        Ok(Self {
            upstream_url,
            upstream_timeout,
            user_agent,
            cache_ttl,
            cache_sweep_interval,
            upstream_max_limit,
            safe_limit,
            default_limit,
            default_window_days,
            time_convention,
        })
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy {
            upstream_max_limit: self.upstream_max_limit,
            safe_limit: self.safe_limit.min(self.upstream_max_limit),
            default_limit: self.default_limit,
            default_window: chrono::Duration::days(i64::from(self.default_window_days)),
            time_convention: self.time_convention,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env_optional_string(key).unwrap_or_else(|| default.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_optional_string(key)
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_optional_string(key)
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}
