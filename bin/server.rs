// Sydney Property Pipeline - Dashboard Server
// Serves the dashboard page and its JSON data over the latest processed export

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use property_pipeline::dashboard::{
    build_view, load_dashboard_data, DashboardData, DashboardFilter, DashboardView,
};
use property_pipeline::loader::LATEST_EXPORT_FILENAME;
use property_pipeline::Config;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

const ADDR: &str = "0.0.0.0:3000";

/// Shared application state
#[derive(Clone)]
struct AppState {
    data: Arc<Mutex<DashboardData>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
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

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/dashboard?min_price&max_price&type&distance - Chart data for one filter selection
async fn get_dashboard(
    State(state): State<AppState>,
    Query(filter): Query<DashboardFilter>,
) -> impl IntoResponse {
    let data = match state.data.lock() {
        Ok(data) => data,
        Err(e) => {
            error!("Dashboard state unavailable: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<DashboardView>::err("dashboard state unavailable")),
            )
                .into_response();
        }
    };

    let view = build_view(&data, &filter);
    (StatusCode::OK, Json(ApiResponse::ok(view))).into_response()
}

/// GET / - Serve index.html
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // A missing file is not fatal: the page shows the banner instead
    let data_path = config.processed_dir().join(LATEST_EXPORT_FILENAME);
    let data = load_dashboard_data(&data_path);
    info!("Dashboard data: {} ({} records)", data_path.display(), data.records.len());

    let state = AppState {
        data: Arc::new(Mutex::new(data)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/dashboard", get(get_dashboard))
        .with_state(state);

    // Build main router
    let app = Router::new()
        .route("/", get(serve_index))
        .nest("/api", api_routes)
        .nest_service("/static", ServeDir::new("web"))
        .layer(CorsLayer::permissive());

    let listener = match tokio::net::TcpListener::bind(ADDR).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", ADDR, e);
            return ExitCode::FAILURE;
        }
    };

    info!("🚀 Dashboard running on http://localhost:3000");
    info!("   API: http://localhost:3000/api/dashboard");

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
