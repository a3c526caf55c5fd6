use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::HeaderValue,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tiergate::{AccountCount, IdentifierCount, IdentifierCounts, RateLimiter, TimeSource};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::error::{ApiError, ErrorResponse};

/// The limiter handlers share. The clock is a trait object so tests can drive it.
pub type SharedLimiter = Arc<RateLimiter<Arc<dyn TimeSource>>>;

/// Path the OpenAPI document is served from.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: SharedLimiter,
}

/// Query parameters of the check endpoint
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CheckQuery {
    /// Identifier to count the event against, e.g. a phone number
    pub identifier: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct CheckResponse {
    /// Whether the event was admitted and counted
    pub allowed: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(OpenApi)]
#[openapi(
    info(title = "tiergate", description = "Two-tier per-second admission control"),
    paths(check, account_counts, identifier_counts, health),
    components(schemas(
        CheckResponse,
        HealthResponse,
        ErrorResponse,
        AccountCount,
        IdentifierCount,
        IdentifierCounts
    )),
    tags(
        (name = "Rate Limit", description = "Admission checks and per-window history"),
        (name = "Health", description = "Liveness")
    )
)]
pub struct ApiDoc;

/// Router for the rate-limit API.
///
/// Browsers may call it only from `allowed_origins`; entries that are not
/// valid header values are skipped with a warning.
pub fn build_router(limiter: SharedLimiter, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/check", get(check))
        .route("/account-counts", get(account_counts))
        .route("/identifier-counts", get(identifier_counts));

    Router::new()
        .nest("/api/rate-limit", api)
        .route("/health", get(health))
        .route(OPENAPI_PATH, get(openapi))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { limiter })
}

#[utoipa::path(
    get,
    path = "/api/rate-limit/check",
    params(CheckQuery),
    responses(
        (status = 200, description = "Admission decision; admitted events are counted", body = CheckResponse),
        (status = 400, description = "Identifier missing or blank", body = ErrorResponse)
    ),
    tag = "Rate Limit"
)]
async fn check(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, ApiError> {
    let identifier = match query.identifier.as_deref() {
        Some(identifier) if !identifier.trim().is_empty() => identifier,
        _ => {
            tracing::warn!("check called without an identifier");
            return Err(ApiError::MissingIdentifier);
        }
    };

    let decision = state.limiter.check(identifier);
    tracing::debug!(identifier, ?decision, "checked");

    Ok(Json(CheckResponse {
        allowed: decision.is_admitted(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/rate-limit/account-counts",
    responses(
        (status = 200, description = "Admitted events per retained window, oldest first", body = [AccountCount])
    ),
    tag = "Rate Limit"
)]
async fn account_counts(State(state): State<AppState>) -> Json<Vec<AccountCount>> {
    Json(state.limiter.account_counts())
}

#[utoipa::path(
    get,
    path = "/api/rate-limit/identifier-counts",
    responses(
        (status = 200, description = "Per-identifier admitted events per retained window", body = [IdentifierCounts])
    ),
    tag = "Rate Limit"
)]
async fn identifier_counts(State(state): State<AppState>) -> Json<Vec<IdentifierCounts>> {
    Json(state.limiter.per_identifier_counts())
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "Health"
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
