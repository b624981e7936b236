use axum::response::Response;
use axum::Router;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::services::normalize::NormalizedEvent;
use crate::state::AppState;
use crate::time::TimeConvention;

pub fn test_config(upstream_url: &str) -> ProxyConfig {
    ProxyConfig {
        upstream_url: upstream_url.to_string(),
        upstream_timeout: Duration::from_secs(5),
        user_agent: "seismic-proxy-tests".to_string(),
        cache_ttl: Duration::from_secs(120),
        cache_sweep_interval: None,
        upstream_max_limit: 2500,
        safe_limit: 1000,
        default_limit: 1000,
        default_window_days: 7,
        time_convention: TimeConvention::Utc,
    }
}

pub fn test_state(upstream_url: &str) -> AppState {
    AppState::new(&test_config(upstream_url), reqwest::Client::new())
}

/// Serves `router` on an ephemeral localhost port and returns its base URL.
pub async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake upstream");
    let addr = listener.local_addr().expect("fake upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

#[derive(Clone, Default)]
pub struct UpstreamHits(Arc<AtomicUsize>);

impl UpstreamHits {
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub async fn read_json(response: Response) -> JsonValue {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn event(event_id: Option<&str>, occurred_at: &str) -> NormalizedEvent {
    NormalizedEvent {
        event_id: event_id.map(str::to_string),
        occurred_at: crate::time::parse_record_time(occurred_at).expect("occurred_at"),
        magnitude: None,
        depth: None,
        last_update_at: None,
        fields: serde_json::Map::new(),
    }
}
