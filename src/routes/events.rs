use axum::extract::{RawQuery, State};
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::services::cache::NormalizedResponse;
use crate::services::normalize::{normalize, NormalizedEvent};
use crate::services::query_filter::{normalize_query, EventQuery, QueryFilter};
use crate::state::AppState;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventsEnvelope {
    pub success: bool,
    pub cached: bool,
    pub params: QueryFilter,
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<NormalizedEvent>,
    pub fetched_at: String,
}

impl EventsEnvelope {
    fn new(params: QueryFilter, response: &NormalizedResponse, cached: bool) -> Self {
        Self {
            success: true,
            cached,
            params,
            data: response.events.clone(),
            fetched_at: response.fetched_at.to_rfc3339(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/events",
    tag = "events",
    params(EventQuery),
    responses(
        (status = 200, description = "Normalised seismic events", body = EventsEnvelope),
        (status = 400, description = "Invalid or conflicting parameters", body = crate::error::ErrorEnvelope),
        (status = 502, description = "Upstream failed or returned an unusable payload", body = crate::error::ErrorEnvelope),
        (status = 504, description = "Upstream timed out", body = crate::error::ErrorEnvelope)
    )
)]
pub(crate) async fn list_events(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> AppResult<Json<EventsEnvelope>> {
    let query = EventQuery::from_query_string(raw.as_deref());
    let filter = normalize_query(&query, &state.policy).map_err(|err| {
        tracing::debug!(error = %err, "rejected event query");
        AppError::from(err)
    })?;
    let key = filter.cache_key();

    if query.bypass_cache() {
        tracing::debug!(%key, "cache bypass requested");
    } else if let Some(hit) = state.cache.get(&key).await {
        tracing::debug!(%key, events = hit.events.len(), "cache hit");
        return Ok(Json(EventsEnvelope::new(filter, &hit, true)));
    } else {
        tracing::debug!(%key, "cache miss");
    }

    let payload = state.upstream.fetch(&filter).await.map_err(|err| {
        tracing::warn!(error = %err, upstream = %state.upstream.url(), "upstream fetch failed");
        AppError::from(err)
    })?;
    let shape = payload.kind();
    let outcome = normalize(payload);
    tracing::info!(
        shape,
        raw = outcome.raw_records,
        dropped_without_time = outcome.dropped_without_time,
        merged_duplicates = outcome.merged_duplicates,
        events = outcome.events.len(),
        "fetched upstream events"
    );

    let response = Arc::new(NormalizedResponse {
        events: outcome.events,
        fetched_at: Utc::now(),
    });
    state.cache.put(key, response.clone()).await;
    Ok(Json(EventsEnvelope::new(filter, &response, false)))
}

pub(crate) async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub(crate) async fn method_not_allowed(method: Method) -> AppError {
    AppError::method_not_allowed(&method)
}

pub fn router() -> Router<AppState> {
    let events = || {
        get(list_events)
            .options(preflight)
            .fallback(method_not_allowed)
    };
    Router::new()
        .route("/", events())
        .route("/api/events", events())
}
