use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(title = "seismic-proxy", description = "Caching proxy for the AFAD seismic event service"),
    paths(
        crate::routes::events::list_events,
        crate::routes::health::healthz_handler,
    ),
    components(schemas(
        crate::routes::events::EventsEnvelope,
        crate::routes::health::HealthResponse,
        crate::error::ErrorEnvelope,
        crate::error::ErrorKind,
        crate::services::query_filter::QueryFilter,
        crate::services::query_filter::TimeRange,
        crate::services::query_filter::ValueRange,
        crate::services::query_filter::Pagination,
        crate::services::query_filter::SortOrder,
    )),
    tags(
        (name = "events", description = "Seismic event queries"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

pub fn openapi_json() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

async fn openapi_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/openapi.json", get(openapi_handler))
}
