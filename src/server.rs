use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::capability::CapabilityReport;
use crate::error::TreeplexError;
use crate::lifecycle::LifecycleManager;
use crate::search::{SearchHit, SearchMode};
use crate::tenant::{StorageMode, Tenant, TenantId};

#[derive(Deserialize)]
pub struct CreateTenantRequest {
    pub display_name: String,
    #[serde(default)]
    pub mode: Option<StorageMode>,
}

#[derive(Serialize)]
pub struct TenantResponse {
    pub tenant: Tenant,
    pub capabilities: CapabilityReport,
}

#[derive(Deserialize)]
pub struct RewriteRequest {
    pub sql: String,
}

#[derive(Serialize)]
pub struct RewriteResponse {
    pub sql: String,
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub elapsed_ms: f64,
    pub hits: Vec<SearchHit>,
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
}

pub struct ApiError(TreeplexError);

impl From<TreeplexError> for ApiError {
    fn from(e: TreeplexError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TreeplexError::TenantNotFound(_) => StatusCode::NOT_FOUND,
            TreeplexError::TenantConflict(_) | TreeplexError::TenantStillRegistered(_) => StatusCode::CONFLICT,
            TreeplexError::InvalidTenant(_)
            | TreeplexError::InvalidArgument(_)
            | TreeplexError::SanitizationRejected { .. } => StatusCode::BAD_REQUEST,
            TreeplexError::CapabilityUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = self.0.to_string();
        warn!(%error, code = %status.as_u16(), "request failed");
        (status, Json(ErrorBody { status: "error", error })).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// The engine is synchronous, so every handler runs on the blocking pool.
async fn blocking<T, F>(f: F) -> std::result::Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(TreeplexError::Persistence(format!("join error: {}", e))))?
        .map_err(ApiError)
}

async fn create_tenant(
    State(manager): State<Arc<LifecycleManager>>,
    Json(req): Json<CreateTenantRequest>,
) -> std::result::Result<(StatusCode, Json<TenantResponse>), ApiError> {
    let body = blocking(move || {
        let database = manager.create_tenant(&req.display_name, req.mode)?;
        Ok(TenantResponse {
            tenant: database.tenant().clone(),
            capabilities: database.capabilities().get_all_capabilities(),
        })
    })
    .await?;
    Ok((StatusCode::CREATED, Json(body)))
}

async fn list_tenants(State(manager): State<Arc<LifecycleManager>>) -> ApiResult<Vec<Tenant>> {
    Ok(Json(blocking(move || manager.tenants()).await?))
}

async fn deregister_tenant(State(manager): State<Arc<LifecycleManager>>, Path(id): Path<String>) -> ApiResult<Tenant> {
    Ok(Json(blocking(move || manager.deregister(&TenantId::new(id)?)).await?))
}

async fn capabilities(State(manager): State<Arc<LifecycleManager>>, Path(id): Path<String>) -> ApiResult<CapabilityReport> {
    let report = blocking(move || {
        let database = manager.open_tenant(&TenantId::new(id)?)?;
        Ok(database.capabilities().get_all_capabilities())
    })
    .await?;
    Ok(Json(report))
}

async fn rewrite(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
    Json(req): Json<RewriteRequest>,
) -> ApiResult<RewriteResponse> {
    let sql = blocking(move || manager.rewrite(&TenantId::new(id)?, &req.sql)).await?;
    Ok(Json(RewriteResponse { sql }))
}

async fn search(
    State(manager): State<Arc<LifecycleManager>>,
    Path(id): Path<String>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    let started = Instant::now();
    let hits = blocking(move || {
        let database = manager.open_tenant(&TenantId::new(id)?)?;
        let api = database
            .capabilities()
            .get_search_api()
            .ok_or_else(|| TreeplexError::CapabilityUnavailable("search".into()))?;
        api.search(&req.query, req.mode, req.limit.unwrap_or(api.default_limit()))
    })
    .await?;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(ms = elapsed_ms, hits = hits.len(), "search complete");
    Ok(Json(SearchResponse { elapsed_ms, hits }))
}

pub fn router(manager: Arc<LifecycleManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);
    Router::new()
        .route("/v1/tenants", post(create_tenant).get(list_tenants))
        .route("/v1/tenants/:id", axum::routing::delete(deregister_tenant))
        .route("/v1/tenants/:id/capabilities", get(capabilities))
        .route("/v1/tenants/:id/rewrite", post(rewrite))
        .route("/v1/tenants/:id/search", post(search))
        .layer(cors)
        .with_state(manager)
}
