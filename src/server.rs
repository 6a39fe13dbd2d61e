//! HTTP surface consumed by the editor UI.
//!
//! `POST /execute` always answers `200` with `{result, error}`: toolchain
//! failures, unsupported languages and even malformed bodies are reported
//! in `error`, never through the status code.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::Method;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::executor::{ExecutionRequest, ExecutionResult, Executor};

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct LanguagesResponse {
    languages: Vec<String>,
}

async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Json<ExecutionResult> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected malformed execute request");
            return Json(ExecutionResult::failure(format!(
                "Invalid request: {}",
                rejection.body_text()
            )));
        }
    };

    Json(state.executor.execute(&request).await)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn languages(State(state): State<AppState>) -> Json<LanguagesResponse> {
    Json(LanguagesResponse {
        languages: state
            .executor
            .profiles()
            .ids()
            .into_iter()
            .map(String::from)
            .collect(),
    })
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let origins = config.cors_allow_list()?;
    if origins.is_empty() {
        Ok(layer.allow_origin(Any))
    } else {
        Ok(layer.allow_origin(origins))
    }
}

/// Build the application router. Fails on an invalid CORS origin rather
/// than widening the allow-list.
pub fn router(executor: Arc<Executor>, config: &Config) -> anyhow::Result<Router> {
    Ok(Router::new()
        .route("/execute", post(execute))
        .route("/languages", get(languages))
        .route("/health", get(health))
        .with_state(AppState { executor })
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config)?))
}

/// Serve until Ctrl-C, then cancel in-flight executions and drain.
pub async fn serve(executor: Arc<Executor>, config: &Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(addr = %addr, "Code execution server listening");

    let shutdown = executor.shutdown_token();
    let app = router(executor, config)?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested, cancelling running executions");
            shutdown.cancel();
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
