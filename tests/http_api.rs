//! Integration tests for the HTTP surface.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use code_exec_daemon::config::Config;
use code_exec_daemon::server;
use common::{body_json, get, post_json, post_raw};
use serde_json::json;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Test: GET /health returns 200 with expected JSON fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let scratch = tempfile::tempdir().unwrap();
    let response = get(common::build_test_app(scratch.path()), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// ---------------------------------------------------------------------------
// Test: GET /languages lists the canonical ids
// ---------------------------------------------------------------------------

#[tokio::test]
async fn languages_are_listed() {
    let scratch = tempfile::tempdir().unwrap();
    let response = get(common::build_test_app(scratch.path()), "/languages").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json["languages"],
        json!(["javascript", "python", "java", "cpp", "c", "html"])
    );
}

// ---------------------------------------------------------------------------
// Test: html is echoed back without execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn html_source_is_echoed() {
    let scratch = tempfile::tempdir().unwrap();
    let app = common::build_test_app(scratch.path());
    let page = "<!doctype html><p>Hi</p>";

    let response = post_json(app, "/execute", json!({"code": page, "language": "html"})).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json, json!({"result": page, "error": ""}));
    assert!(common::is_empty_dir(scratch.path()));
}

// ---------------------------------------------------------------------------
// Test: unsupported language is a 200 with an error payload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_language_is_reported_in_body() {
    let scratch = tempfile::tempdir().unwrap();
    let app = common::build_test_app(scratch.path());

    let response = post_json(
        app,
        "/execute",
        json!({"code": "DISPLAY 'HELLO'.", "language": "cobol"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["result"], "");
    assert_eq!(json["error"], "Unsupported language: cobol");
    assert!(common::is_empty_dir(scratch.path()));
}

// ---------------------------------------------------------------------------
// Test: malformed bodies still get the {result, error} shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_json_is_reported_in_body() {
    let scratch = tempfile::tempdir().unwrap();
    let app = common::build_test_app(scratch.path());

    let response = post_raw(app, "/execute", "{\"code\": ").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["result"], "");
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request:"));
}

#[tokio::test]
async fn missing_language_field_is_reported_in_body() {
    let scratch = tempfile::tempdir().unwrap();
    let app = common::build_test_app(scratch.path());

    let response = post_json(app, "/execute", json!({"code": "print(1)"})).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let error = json["error"].as_str().unwrap();
    assert!(error.contains("language"), "got: {error}");
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let scratch = tempfile::tempdir().unwrap();
    let response = get(common::build_test_app(scratch.path()), "/nope").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: CORS preflight from the editor origin is accepted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cors_preflight_allows_editor() {
    let scratch = tempfile::tempdir().unwrap();
    let app = common::build_test_app(scratch.path());

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/execute")
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let allow_origin = response
        .headers()
        .get("access-control-allow-origin")
        .expect("Missing Access-Control-Allow-Origin header")
        .to_str()
        .unwrap();
    assert_eq!(allow_origin, "*");
}

// ---------------------------------------------------------------------------
// Test: an allow-list only echoes listed origins
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cors_allow_list_is_enforced() {
    let scratch = tempfile::tempdir().unwrap();
    let app = common::build_app_with_origins(scratch.path(), &["https://editor.example.com"]);

    let preflight = |origin: &str| {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/execute")
            .header("Origin", origin)
            .header("Access-Control-Request-Method", "POST")
            .body(Body::empty())
            .unwrap()
    };

    let response = app
        .clone()
        .oneshot(preflight("https://editor.example.com"))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "https://editor.example.com"
    );

    let response = app.oneshot(preflight("https://evil.example.net")).await.unwrap();
    assert!(response.headers().get("access-control-allow-origin").is_none());
}

// ---------------------------------------------------------------------------
// Test: an invalid origin fails router construction
// ---------------------------------------------------------------------------

#[test]
fn invalid_cors_origin_is_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let config = Config {
        cors_origins: vec!["http://ok\u{7f}bad".into()],
        ..common::test_config(scratch.path())
    };
    let result = server::router(common::build_executor(scratch.path()), &config);
    assert!(result.is_err());
}
