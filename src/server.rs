// HTTP server for the credit check endpoint
//
// Routes:
// - POST /api/check-credits  credit decision for the authenticated caller
// - GET  /health             liveness
// - GET  /metrics            Prometheus scrape (when enabled)

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::app;
use crate::config::Config;
use crate::credits::{
    CheckCreditsRequest, CheckCreditsResponse, CreditError, HeaderIdentityResolver,
    IdentityResolver, QuotaDecisionEngine, Tier,
};
use crate::metrics;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: QuotaDecisionEngine,
    pub resolver: Arc<dyn IdentityResolver>,
}

impl AppState {
    pub fn new(engine: QuotaDecisionEngine, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { engine, resolver }
    }
}

/// Build the service router
pub fn router(state: AppState, metrics_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/api/check-credits", post(check_credits))
        .route("/health", get(health_handler));

    if metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the HTTP server and run until it fails
pub async fn serve(config: &Config) -> Result<()> {
    if config.metrics.enabled {
        metrics::init().context("Failed to initialize metrics")?;
    }

    let engine = app::build_engine(config)?;
    let resolver = Arc::new(HeaderIdentityResolver::new(
        config.server.identity_header.clone(),
    ));
    let app = router(AppState::new(engine, resolver), config.metrics.enabled);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.server.host, config.server.port))?;

    info!("Starting credit-gate server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind server")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// `POST /api/check-credits`
///
/// The body is decoded as JSON whatever its `content-type`; browser clients
/// posting a string body send `text/plain`.
async fn check_credits(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CheckCreditsResponse>, CreditError> {
    let identity = state.resolver.resolve(&headers)?;
    let request = decode_request(&body)?;

    let decision = state
        .engine
        .decide(&identity, Tier::from_api_key_flag(request.has_api_key))
        .await?;

    Ok(Json(decision.to_response()))
}

fn decode_request(body: &[u8]) -> Result<CheckCreditsRequest, CreditError> {
    serde_json::from_slice(body).map_err(|e| CreditError::MalformedRequest(e.to_string()))
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
