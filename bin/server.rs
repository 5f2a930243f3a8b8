// Mualaf Sync - Web Server
// Thin REST API over the record store

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, patch},
    Router,
};
use chrono::Utc;
use clap::Parser;
use mualaf_sync::{PageQuery, Record, RecordFilter, RecordStore, SqliteStore, SyncConfig, SyncError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mualaf-server")]
#[command(about = "REST API over the mualaf record store")]
struct Args {
    /// SQLite database file
    #[arg(long, default_value = "mualaf.db")]
    db: PathBuf,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "3000")]
    port: u16,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<SqliteStore>,
    config: Arc<SyncConfig>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn error_response(e: SyncError) -> Response {
    let status = match &e {
        SyncError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
        SyncError::Config(_) | SyncError::Import(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "request failed");
    } else {
        warn!(error = %e, "request rejected");
    }
    (status, Json(ApiResponse::<()>::err(e.to_string()))).into_response()
}

#[derive(Debug, Deserialize)]
struct ListParams {
    category: Option<String>,
    status: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    actor: Option<String>,
    fields: Record,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/tables/:table/records - One page of records, newest first
async fn list_records(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<ListParams>,
) -> Response {
    let mut filter =
        RecordFilter::with_status(params.status.unwrap_or_else(|| state.config.default_status.clone()));
    if let Some(category) = params.category {
        filter = filter.with_category(category);
    }

    let query = PageQuery {
        table,
        filter,
        offset: params.offset.unwrap_or(0),
        limit: params.limit.unwrap_or(state.config.page_size),
    };

    match state.store.fetch_page(&query).await {
        Ok(records) => (StatusCode::OK, Json(ApiResponse::ok(records))).into_response(),
        Err(e) => error_response(e),
    }
}

/// PATCH /api/tables/:table/records/:id - Merge fields into one record
async fn update_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    Json(body): Json<UpdateBody>,
) -> Response {
    let actor = body.actor.unwrap_or_else(|| state.config.actor.clone());
    let mut payload = body.fields.update_payload();
    payload.stamp_update(&actor, Utc::now());

    match state.store.update_record(&table, &id, &payload).await {
        Ok(()) => {
            info!(table = %table, id = %id, actor = %actor, "record updated");
            (StatusCode::OK, Json(ApiResponse::ok(payload))).into_response()
        }
        Err(e) => error_response(e),
    }
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/tables/:table/records", get(list_records))
        .route("/tables/:table/records/:id", patch(update_record))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = SyncConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Failed to open database {}", args.db.display()))?;
    info!(db = %args.db.display(), "database opened");

    let state = AppState {
        store: Arc::new(store),
        config: Arc::new(config),
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("🚀 Server running on http://localhost:{}", args.port);
    axum::serve(listener, app).await.context("Server stopped")?;
    Ok(())
}
