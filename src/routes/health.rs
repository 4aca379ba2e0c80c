use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::query_scalar;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store_ok: bool,
    pub store_error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let probe = query_scalar::<_, i64>("SELECT COUNT(*) FROM projects").fetch_one(&state.pool).await;

    let response = match probe {
        Ok(_) => HealthResponse { status: "ok", store_ok: true, store_error: None },
        Err(e) => {
            tracing::warn!("health probe failed: {}", e);
            HealthResponse { status: "degraded", store_ok: false, store_error: Some(e.to_string()) }
        }
    };
    Ok(Json(response))
}
