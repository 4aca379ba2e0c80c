use anyhow::Result;
use axum::http::StatusCode;

mod common;
use common::{send, test_app};

#[tokio::test]
async fn health_endpoint_reports_store_ok() -> Result<()> {
    let (_dir, _pool, app) = test_app().await?;

    let (status, body) = send(&app, "GET", "/api/health", None, None).await?;
    assert_eq!(status, StatusCode::OK, "health endpoint did not return 200");
    assert_eq!(body["store_ok"], true, "expected store_ok: true, got: {}", body);
    assert_eq!(body["status"], "ok");

    Ok(())
}

#[tokio::test]
async fn missing_bearer_is_unauthorized() -> Result<()> {
    let (_dir, _pool, app) = test_app().await?;

    let (status, body) = send(&app, "GET", "/projects", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = send(&app, "GET", "/projects", Some("not-a-jwt"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token");

    Ok(())
}
