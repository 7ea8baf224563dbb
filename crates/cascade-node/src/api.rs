//! HTTP API for the Cascade node.

use crate::codes::CodeService;
use crate::directory::ServiceDirectory;
use crate::error::Error;
use crate::export::{export_referrals, ExportFormat};
use crate::models::{
    CodeUsage, EventLogEntry, ExternalService, Referral, ReferralCode, User, UserServiceLink,
};
use crate::referrals::{LevelCount, ReferralService, ReferrerCount, RegisterReferral};
use crate::storage::Storage;
use crate::users::UserRegistry;
use crate::webhook::{RetryOutcome, WebhookDelivery};
use axum::{
    extract::{Path, Query, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Everything the handlers need, wired once at startup.
pub struct AppContext {
    pub storage: Arc<Storage>,
    pub referrals: ReferralService,
    pub codes: CodeService,
    pub users: UserRegistry,
    pub directory: ServiceDirectory,
    pub webhooks: Arc<WebhookDelivery>,
}

impl AppContext {
    pub fn new(storage: Arc<Storage>) -> Self {
        let webhooks = Arc::new(WebhookDelivery::new(Arc::clone(&storage)));
        Self {
            referrals: ReferralService::new(Arc::clone(&storage)).with_notifier(Arc::clone(&webhooks)),
            codes: CodeService::new(Arc::clone(&storage)),
            users: UserRegistry::new(Arc::clone(&storage)),
            directory: ServiceDirectory::new(Arc::clone(&storage)),
            webhooks,
            storage,
        }
    }
}

type AppState = Arc<AppContext>;

/// Error wrapper that maps node errors onto HTTP statuses with a JSON
/// `{"detail": ...}` body.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Cycle | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match status {
            // Internal detail stays in the logs, not on the wire.
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("request failed: {}", self.0);
                "Internal server error".to_string()
            }
            _ => self.0.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    // CORS layer for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health))
        // Referrals
        .route("/referrals", post(register_referral))
        .route("/referrals/:user_id/:service_id", get(get_user_referrals))
        .route("/referrals/chain/:user_id/:service_id", get(get_parent_chain))
        .route("/referrals/top/:service_id", get(get_top_referrers))
        .route("/referrals/stats/:service_id", get(get_referral_stats))
        .route("/referrals/export/:service_id", get(export_service_referrals))
        .route("/referrals/level/:referral_id", patch(update_referral_level))
        // Referral codes
        .route("/referral-codes", post(create_code))
        .route("/referral-codes/:code", get(validate_code).patch(update_code_limits))
        .route("/referral-codes/:code/deactivate", post(deactivate_code))
        .route("/referral-codes/service/:service_id", get(codes_by_service))
        .route("/referral-codes/inactive/:service_id", get(inactive_codes))
        .route(
            "/referral-codes/history/:code_id",
            get(code_usage_history).delete(clear_code_usage),
        )
        // Users
        .route("/users", post(register_user))
        .route("/users/:user_id/services", get(user_memberships))
        .route("/users/service/:service_id/users", get(service_members))
        // External services
        .route("/external-services", post(register_external_service))
        .route("/external-services/:service_id/webhook", patch(update_webhook))
        .route("/external-services/by-api-key", get(service_by_api_key))
        .route("/external-services/:service_id/archive", post(archive_service))
        .route("/external-services/webhook/retry/:event_id", post(retry_webhook))
        .route(
            "/external-services/webhook/retry-failed/:service_id",
            post(retry_failed_webhooks),
        )
        .route("/external-services/logs/:service_id", get(service_logs))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_key,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API-key gate. A tenant must be able to enroll before it has a key,
/// so `/health` and tenant registration stay open; everything else
/// requires a key that resolves to a registered tenant.
async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path();
    let open = path == "/health" || (path == "/external-services" && req.method() == Method::POST);
    if open {
        return next.run(req).await;
    }

    let Some(api_key) = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
    else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Missing API key" })),
        )
            .into_response();
    };

    match state.storage.service_by_api_key(api_key) {
        Ok(Some(_)) => next.run(req).await,
        Ok(None) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "detail": "Invalid API key" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("API key lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "Internal server error" })),
            )
                .into_response()
        }
    }
}

// --- Health ---

async fn health() -> &'static str {
    "OK"
}

// --- Referral endpoints ---

async fn register_referral(
    State(state): State<AppState>,
    Json(req): Json<RegisterReferral>,
) -> ApiResult<(StatusCode, Json<Referral>)> {
    let referral = state.referrals.register(req).await?;
    Ok((StatusCode::CREATED, Json(referral)))
}

async fn get_user_referrals(
    State(state): State<AppState>,
    Path((user_id, service_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Vec<Referral>>> {
    Ok(Json(state.referrals.referrals_of(user_id, service_id)?))
}

async fn get_parent_chain(
    State(state): State<AppState>,
    Path((user_id, service_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Vec<Referral>>> {
    Ok(Json(state.referrals.parent_chain(user_id, service_id)?))
}

#[derive(Debug, Deserialize)]
struct TopQuery {
    limit: Option<usize>,
}

async fn get_top_referrers(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
    Query(query): Query<TopQuery>,
) -> ApiResult<Json<Vec<ReferrerCount>>> {
    let limit = query.limit.unwrap_or(10);
    Ok(Json(state.referrals.top_referrers(service_id, limit)?))
}

async fn get_referral_stats(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
) -> ApiResult<Json<Vec<LevelCount>>> {
    Ok(Json(state.referrals.stats(service_id)?))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn export_service_referrals(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format: ExportFormat = query.format.as_deref().unwrap_or("json").parse()?;
    let referrals = state.referrals.all_referrals(service_id)?;
    let body = export_referrals(&referrals, format)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

#[derive(Debug, Deserialize)]
struct LevelUpdateRequest {
    level: u32,
}

async fn update_referral_level(
    State(state): State<AppState>,
    Path(referral_id): Path<Uuid>,
    Json(req): Json<LevelUpdateRequest>,
) -> ApiResult<Json<Referral>> {
    Ok(Json(state.referrals.force_level(referral_id, req.level)?))
}

// --- Referral code endpoints ---

#[derive(Debug, Deserialize)]
struct CreateCodeRequest {
    user_id: Uuid,
    service_id: Uuid,
    expires_at: Option<DateTime<Utc>>,
    usage_limit: Option<u32>,
}

async fn create_code(
    State(state): State<AppState>,
    Json(req): Json<CreateCodeRequest>,
) -> ApiResult<(StatusCode, Json<ReferralCode>)> {
    let code = state
        .codes
        .create_code(req.user_id, req.service_id, req.expires_at, req.usage_limit)?;
    Ok((StatusCode::CREATED, Json(code)))
}

#[derive(Debug, Deserialize)]
struct ValidateQuery {
    service_id: Uuid,
}

async fn validate_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<ValidateQuery>,
) -> ApiResult<Json<ReferralCode>> {
    Ok(Json(state.codes.validate_code(query.service_id, &code)?))
}

#[derive(Debug, Deserialize)]
struct CodeLimitsRequest {
    expires_at: Option<DateTime<Utc>>,
    usage_limit: Option<u32>,
}

async fn update_code_limits(
    State(state): State<AppState>,
    Path(code_id): Path<Uuid>,
    Json(req): Json<CodeLimitsRequest>,
) -> ApiResult<Json<ReferralCode>> {
    Ok(Json(state.codes.update_limits(
        code_id,
        req.expires_at,
        req.usage_limit,
    )?))
}

async fn deactivate_code(
    State(state): State<AppState>,
    Path(code_id): Path<Uuid>,
) -> ApiResult<Json<ReferralCode>> {
    Ok(Json(state.codes.deactivate_code(code_id)?))
}

async fn codes_by_service(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ReferralCode>>> {
    Ok(Json(state.codes.codes_by_service(service_id)?))
}

async fn inactive_codes(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ReferralCode>>> {
    Ok(Json(state.codes.inactive_codes(service_id)?))
}

async fn code_usage_history(
    State(state): State<AppState>,
    Path(code_id): Path<Uuid>,
) -> ApiResult<Json<Vec<CodeUsage>>> {
    Ok(Json(state.codes.usage_history(code_id)?))
}

async fn clear_code_usage(
    State(state): State<AppState>,
    Path(code_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.codes.clear_usage(code_id)?;
    Ok(Json(json!({ "status": "ok" })))
}

// --- User endpoints ---

#[derive(Debug, Deserialize)]
struct RegisterUserRequest {
    external_user_id: String,
    service_id: Uuid,
}

async fn register_user(
    State(state): State<AppState>,
    Json(req): Json<RegisterUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state
        .users
        .register_user(&req.external_user_id, req.service_id)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn user_memberships(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Vec<UserServiceLink>>> {
    Ok(Json(state.users.user_memberships(user_id)?))
}

async fn service_members(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
) -> ApiResult<Json<Vec<UserServiceLink>>> {
    Ok(Json(state.users.service_members(service_id)?))
}

// --- External service endpoints ---

#[derive(Debug, Deserialize)]
struct RegisterServiceRequest {
    service_name: String,
    webhook_url: Option<String>,
}

async fn register_external_service(
    State(state): State<AppState>,
    Json(req): Json<RegisterServiceRequest>,
) -> ApiResult<(StatusCode, Json<ExternalService>)> {
    let service = state
        .directory
        .register_service(&req.service_name, req.webhook_url)?;
    Ok((StatusCode::CREATED, Json(service)))
}

#[derive(Debug, Deserialize)]
struct WebhookUpdateRequest {
    webhook_url: Option<String>,
}

async fn update_webhook(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
    Json(req): Json<WebhookUpdateRequest>,
) -> ApiResult<Json<ExternalService>> {
    Ok(Json(
        state.directory.update_webhook(service_id, req.webhook_url)?,
    ))
}

#[derive(Debug, Deserialize)]
struct ByApiKeyQuery {
    api_key: String,
}

async fn service_by_api_key(
    State(state): State<AppState>,
    Query(query): Query<ByApiKeyQuery>,
) -> ApiResult<Json<ExternalService>> {
    let service = state
        .directory
        .service_by_api_key(&query.api_key)?
        .ok_or(Error::NotFound("Invalid API key".to_string()))?;
    Ok(Json(service))
}

async fn archive_service(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
) -> ApiResult<Json<crate::directory::ArchiveSummary>> {
    let summary = state.directory.archive_service(service_id)?;
    state.referrals.forget_service(service_id);
    Ok(Json(summary))
}

async fn retry_webhook(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let success = state.webhooks.retry_event(event_id).await?;
    Ok(Json(json!({ "success": success })))
}

async fn retry_failed_webhooks(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
) -> ApiResult<Json<Vec<RetryOutcome>>> {
    Ok(Json(state.webhooks.retry_failed(service_id).await?))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    event_type: Option<String>,
}

async fn service_logs(
    State(state): State<AppState>,
    Path(service_id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Vec<EventLogEntry>>> {
    Ok(Json(
        state
            .directory
            .logs(service_id, query.event_type.as_deref())?,
    ))
}
