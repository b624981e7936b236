use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};

use crate::services::normalize::UpstreamPayload;
use crate::services::query_filter::QueryFilter;

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream did not answer within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("upstream returned HTTP {status}")]
    Http { status: StatusCode, body: String },
    #[error("no response from upstream: {0}")]
    NoResponse(String),
    #[error("upstream returned no usable payload: {0}")]
    EmptyBody(String),
}

/// One GET per call against the upstream event endpoint. No retries.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    url: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(http: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self, filter: &QueryFilter) -> Result<UpstreamPayload, UpstreamError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.fetch_inner(filter))
            .await
            .unwrap_or(Err(UpstreamError::Timeout(self.timeout)));
        tracing::debug!(
            url = %self.url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "upstream call finished"
        );
        result
    }

    async fn fetch_inner(&self, filter: &QueryFilter) -> Result<UpstreamPayload, UpstreamError> {
        let response = self
            .http
            .get(&self.url)
            .query(&filter.upstream_params())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                status,
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(UpstreamError::EmptyBody("empty body".to_string()));
        }
        let body: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|err| UpstreamError::EmptyBody(format!("body is not JSON: {err}")))?;
        if body.is_null() {
            return Err(UpstreamError::EmptyBody("body is null".to_string()));
        }
        Ok(UpstreamPayload::classify(body))
    }

    fn transport_error(&self, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::NoResponse(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::query_filter::{normalize_query, EventQuery, FilterPolicy};
    use crate::test_support::spawn_upstream;
    use axum::extract::RawQuery;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    fn filter() -> QueryFilter {
        let raw = EventQuery::from_query_string(Some(
            "start=2024-01-01T00:00:00&end=2024-01-02T00:00:00&limit=10&minmag=2.5",
        ));
        normalize_query(&raw, &FilterPolicy::default()).expect("filter")
    }

    fn client(url: String, timeout: Duration) -> UpstreamClient {
        UpstreamClient::new(Client::new(), url, timeout)
    }

    #[tokio::test]
    async fn sends_upstream_params_and_classifies_payload() {
        let upstream = Router::new().route(
            "/events",
            get(|RawQuery(query): RawQuery| async move {
                axum::Json(json!([{ "eventID": "1", "query": query }]))
            }),
        );
        let base = spawn_upstream(upstream).await;

        let payload = client(format!("{base}/events"), Duration::from_secs(5))
            .fetch(&filter())
            .await
            .expect("payload");
        let items = match payload {
            UpstreamPayload::List(items) => items,
            other => panic!("expected list payload, got {}", other.kind()),
        };
        let sent = items[0]["query"].as_str().expect("query string");
        for expected in [
            "start=2024-01-01T00%3A00%3A00",
            "end=2024-01-02T00%3A00%3A00",
            "limit=10",
            "minmag=2.5",
            "orderby=timedesc",
            "format=json",
        ] {
            assert!(sent.contains(expected), "{expected} missing from {sent}");
        }
    }

    #[tokio::test]
    async fn non_success_status_is_http_error() {
        let upstream = Router::new().route(
            "/events",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        );
        let base = spawn_upstream(upstream).await;

        let err = client(format!("{base}/events"), Duration::from_secs(5))
            .fetch(&filter())
            .await
            .expect_err("http error");
        match err {
            UpstreamError::Http { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let upstream = Router::new().route(
            "/events",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                axum::Json(json!([]))
            }),
        );
        let base = spawn_upstream(upstream).await;

        let err = client(format!("{base}/events"), Duration::from_millis(200))
            .fetch(&filter())
            .await
            .expect_err("timeout");
        assert!(matches!(err, UpstreamError::Timeout(_)), "{err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_no_response() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = client(format!("http://{addr}/events"), Duration::from_secs(5))
            .fetch(&filter())
            .await
            .expect_err("no response");
        assert!(matches!(err, UpstreamError::NoResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn empty_null_or_non_json_bodies_are_unusable() {
        let upstream = Router::new()
            .route("/empty", get(|| async { "" }))
            .route("/null", get(|| async { "null" }))
            .route("/xml", get(|| async { "<events/>" }));
        let base = spawn_upstream(upstream).await;

        for path in ["empty", "null", "xml"] {
            let err = client(format!("{base}/{path}"), Duration::from_secs(5))
                .fetch(&filter())
                .await
                .expect_err("empty body");
            assert!(matches!(err, UpstreamError::EmptyBody(_)), "{path}: {err:?}");
        }
    }
}
