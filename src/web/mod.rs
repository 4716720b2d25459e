// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP API over the organizer
//!
//! Owners arrive as path segments and are trusted: authentication belongs to
//! whatever sits in front of this server.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::catalog::{ArchiveRecord, CatalogStore, RecordId, HISTORY_PAGE_SIZE};
use crate::config::AppConfig;
use crate::db::Database;
use crate::organizer::{AuditReport, CollisionPolicy, OrganizeReport, Organizer};
use crate::{ArquivistaError, Owner};

/// Shared application state
pub struct AppState {
    pub organizer: Organizer<Database>,
    pub config: AppConfig,
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api_health))
        .route("/api/owners/:owner/organize", post(api_organize))
        .route("/api/owners/:owner/history", get(api_history))
        .route("/api/owners/:owner/records/:id", get(api_record))
        .route("/api/owners/:owner/categories", get(api_categories))
        .route("/api/owners/:owner/audit", get(api_audit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error body returned by every handler
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub enum ApiError {
    Arquivista(ArquivistaError),
    NotFound(String),
    Internal(String),
}

impl From<ArquivistaError> for ApiError {
    fn from(err: ArquivistaError) -> Self {
        Self::Arquivista(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Arquivista(err) => {
                let status = match &err {
                    ArquivistaError::InvalidOwner(_)
                    | ArquivistaError::SourceNotDirectory(_)
                    | ArquivistaError::Config(_) => StatusCode::BAD_REQUEST,
                    ArquivistaError::SourceMissing(_) => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        if status.is_server_error() {
            error!("API error: {}", message);
        }
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn api_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct OrganizeRequest {
    pub source: PathBuf,
    #[serde(default)]
    pub on_conflict: Option<CollisionPolicy>,
}

async fn api_organize(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Json(request): Json<OrganizeRequest>,
) -> ApiResult<OrganizeReport> {
    let owner = Owner::new(owner)?;
    let policy = request
        .on_conflict
        .unwrap_or(state.config.organize.on_conflict);

    let worker = Arc::clone(&state);
    let report = tokio::task::spawn_blocking(move || {
        worker.organizer.organize(&owner, &request.source, policy)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("organize task failed: {}", e)))??;

    Ok(Json(report))
}

#[derive(Deserialize)]
struct HistoryQuery {
    after: Option<i64>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryPage {
    pub records: Vec<ArchiveRecord>,
    /// Pass as `after` to fetch the next page
    pub next: Option<RecordId>,
}

async fn api_history(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryPage> {
    let owner = Owner::new(owner)?;
    let limit = query.limit.unwrap_or(50).clamp(1, HISTORY_PAGE_SIZE);
    let records = state
        .organizer
        .store()
        .page(&owner, query.after.map(RecordId), limit)?;
    let next = if records.len() == limit {
        records.last().map(|r| r.id)
    } else {
        None
    };
    Ok(Json(HistoryPage { records, next }))
}

async fn api_record(
    State(state): State<Arc<AppState>>,
    Path((owner, id)): Path<(String, i64)>,
) -> ApiResult<ArchiveRecord> {
    let owner = Owner::new(owner)?;
    match state.organizer.store().get(RecordId(id))? {
        Some(record) if record.owner == owner => Ok(Json(record)),
        _ => Err(ApiError::NotFound(format!("record {} not found for {}", id, owner))),
    }
}

async fn api_categories(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> ApiResult<Vec<(String, i64)>> {
    let owner = Owner::new(owner)?;
    Ok(Json(state.organizer.store().category_counts(&owner)?))
}

async fn api_audit(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> ApiResult<AuditReport> {
    let owner = Owner::new(owner)?;
    let worker = Arc::clone(&state);
    let audit = tokio::task::spawn_blocking(move || worker.organizer.audit(&owner))
        .await
        .map_err(|e| ApiError::Internal(format!("audit task failed: {}", e)))??;
    Ok(Json(audit))
}

/// Start the web server with config and organizer
pub async fn start_server(config: AppConfig, organizer: Organizer<Database>) -> crate::Result<()> {
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let state = Arc::new(AppState { organizer, config });

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .map_err(|e| ArquivistaError::Config(format!("Server error: {}", e)))?;
    Ok(())
}
