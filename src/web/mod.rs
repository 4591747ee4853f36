// Web server: Axum-based analysis API.
//
// All routes live under /api and serve JSON. State is a bundle of shared,
// read-only handles (engine, classifiers, database, transport), so handlers
// never coordinate with each other.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::db::Database;
use crate::email::transport::MailTransport;
use crate::scoring::fusion::FusionEngine;
use crate::sentiment::SentimentAnalyzer;
use crate::toxicity::keywords::KeywordClassifier;

pub mod handlers;

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FusionEngine>,
    pub keywords: Arc<KeywordClassifier>,
    pub sentiment: Arc<dyn SentimentAnalyzer>,
    pub db: Arc<dyn Database>,
    /// None when SMTP credentials aren't configured.
    pub transport: Option<Arc<dyn MailTransport>>,
    /// Sender used by /send-email when the form doesn't name one.
    pub default_sender: Option<String>,
    pub forward_timeout: Duration,
}

/// Start the Axum web server and block until it exits.
pub async fn run_server(state: AppState, port: u16, bind: &str) -> Result<()> {
    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    info!("harmguard API listening on http://{addr}/api");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/health", get(health))
        .route("/api/analyze", post(handlers::analyze::analyze))
        .route("/api/quick-analyze", post(handlers::analyze::quick_analyze))
        .route("/api/analyze-openai", post(handlers::analyze::analyze_openai))
        .route("/api/analyze-keywords", post(handlers::analyze::analyze_keywords))
        .route("/api/analyze-email", post(handlers::email::analyze_email))
        .route("/api/send-email", post(handlers::email::send_email))
        .route(
            "/api/log-email-attempt",
            post(handlers::email::log_email_attempt),
        )
        .route("/api/threats", get(handlers::threats::list_threats))
        .route("/api/threat-stats", get(handlers::threats::threat_stats));

    api.layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE]),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Health check: always returns 200 OK.
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}
