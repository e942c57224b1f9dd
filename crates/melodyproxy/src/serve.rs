//! `POST /api/generate` pass-through and health endpoint.

use anyhow::{bail, Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Body returned for every failed forward; backend detail stays in the logs.
pub const GENERATION_FAILED: &str = "Generation failed.";

pub struct ServeConfig {
    pub port: u16,
    /// Backend base URL; requests go to `{backend}/generate`.
    pub backend: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct ProxyState {
    http: reqwest::Client,
    generate_url: String,
    start_time: Instant,
}

impl ProxyState {
    pub fn new(backend: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build backend HTTP client")?;
        Ok(ProxyState {
            http,
            generate_url: format!("{}/generate", backend.trim_end_matches('/')),
            start_time: Instant::now(),
        })
    }

    pub fn generate_url(&self) -> &str {
        &self.generate_url
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/api/generate", post(handle_generate))
        .route("/health", get(handle_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn forward(state: &ProxyState, body: &Value) -> Result<Value> {
    let response = state
        .http
        .post(&state.generate_url)
        .json(body)
        .send()
        .await
        .context("backend unreachable")?;

    let status = response.status();
    if !status.is_success() {
        bail!("backend answered {status}");
    }

    response
        .json()
        .await
        .context("backend response was not JSON")
}

pub async fn handle_generate(State(state): State<ProxyState>, Json(body): Json<Value>) -> Response {
    match forward(&state, &body).await {
        Ok(data) => Json(data).into_response(),
        Err(e) => {
            warn!(error = %format!("{e:#}"), backend = %state.generate_url, "generation forward failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": GENERATION_FAILED })),
            )
                .into_response()
        }
    }
}

pub async fn handle_health(State(state): State<ProxyState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.generate_url,
    }))
}

pub async fn run(config: ServeConfig) -> Result<()> {
    let state = ProxyState::new(&config.backend, config.timeout)?;
    info!("MelodyCraft proxy starting");
    info!("   Backend: {}", state.generate_url());

    let app = router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("   Generate: POST http://{}/api/generate", addr);
    info!("   Health: GET http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("SIGTERM handler unavailable: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
