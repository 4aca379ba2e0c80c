#![allow(dead_code)]

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use taskscope::authz::GlobalRole;
use taskscope::jwt::JwtConfig;

pub const TEST_SECRET: &str = "test-secret";

/// Temp-file SQLite database with migrations applied. Keep the `TempDir` alive.
pub async fn test_pool() -> Result<(TempDir, SqlitePool)> {
    let dir = tempfile::tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

pub async fn test_app() -> Result<(TempDir, SqlitePool, Router)> {
    let (dir, pool) = test_pool().await?;
    std::env::set_var("JWT_SECRET", TEST_SECRET);
    let app = taskscope::create_app(pool.clone()).await?;
    Ok((dir, pool, app))
}

pub fn token(user: Uuid, role: GlobalRole) -> String {
    JwtConfig::new(TEST_SECRET, 1)
        .encode(user, role)
        .expect("token encoding")
}

/// Sends a request and returns the status with the decoded JSON body (`Null` when empty).
pub async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, value))
}
