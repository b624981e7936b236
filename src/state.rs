use axum::extract::FromRef;
use reqwest::Client;
use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::services::cache::CacheStore;
use crate::services::query_filter::FilterPolicy;
use crate::services::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub policy: FilterPolicy,
    pub cache: Arc<CacheStore>,
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    pub fn new(config: &ProxyConfig, http: Client) -> Self {
        let upstream = UpstreamClient::new(
            http,
            config.upstream_url.clone(),
            config.upstream_timeout,
        );
        Self {
            policy: config.filter_policy(),
            cache: Arc::new(CacheStore::new(config.cache_ttl)),
            upstream: Arc::new(upstream),
        }
    }
}

impl FromRef<AppState> for Arc<CacheStore> {
    fn from_ref(state: &AppState) -> Arc<CacheStore> {
        state.cache.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_config;

    #[test]
    fn state_is_built_from_config() {
        let mut config = test_config("http://127.0.0.1:9/events");
        config.safe_limit = 200;
        let state = AppState::new(&config, Client::new());

        assert_eq!(state.policy.safe_limit, 200);
        assert_eq!(state.cache.ttl(), config.cache_ttl);
        assert_eq!(state.upstream.url(), "http://127.0.0.1:9/events");
    }
}
