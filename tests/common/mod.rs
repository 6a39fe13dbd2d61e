#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header::CONTENT_TYPE, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use code_exec_daemon::config::Config;
use code_exec_daemon::executor::Executor;
use code_exec_daemon::server;

/// Config pointing at `scratch`, with short deadlines for tests.
pub fn test_config(scratch: &Path) -> Config {
    Config {
        scratch_dir: scratch.to_path_buf(),
        phase_timeout_ms: 20_000,
        probe_timeout_ms: 5_000,
        ..Config::default()
    }
}

pub fn build_executor(scratch: &Path) -> Arc<Executor> {
    let config = test_config(scratch);
    Arc::new(Executor::from_config(&config, scratch.to_path_buf()))
}

/// Full router, wired the same way `main` wires it.
pub fn build_test_app(scratch: &Path) -> Router {
    let config = test_config(scratch);
    server::router(build_executor(scratch), &config).unwrap()
}

/// Router restricted to `origins`.
pub fn build_app_with_origins(scratch: &Path, origins: &[&str]) -> Router {
    let config = Config {
        cors_origins: origins.iter().map(|o| (*o).to_string()).collect(),
        ..test_config(scratch)
    };
    server::router(build_executor(scratch), &config).unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_raw(app: Router, uri: &str, body: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    post_raw(app, uri, &body.to_string()).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
