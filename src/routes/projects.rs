use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::project::{Project, ProjectCreateRequest, ProjectUpdateRequest, QuotaResponse};

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    responses((status = 200, description = "Projects visible to the caller", body = [Project]))
)]
pub async fn list_projects(State(state): State<AppState>, AuthUser(principal): AuthUser) -> AppResult<Json<Vec<Project>>> {
    let projects = state.workflow.scoping().list_visible_projects(&principal).await?;
    Ok(Json(projects))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 409, description = "Project quota exceeded")
    )
)]
pub async fn create_project(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(payload): Json<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    let project = state.workflow.create_project(&principal, payload).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/projects/quota",
    tag = "Projects",
    responses((status = 200, description = "Owned project count and limit", body = QuotaResponse))
)]
pub async fn quota(State(state): State<AppState>, AuthUser(principal): AuthUser) -> AppResult<Json<QuotaResponse>> {
    Ok(Json(state.workflow.quota_status(&principal).await?))
}

#[utoipa::path(
    get,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project detail", body = Project),
        (status = 403, description = "Caller cannot view the project"),
        (status = 404, description = "Project not found")
    )
)]
pub async fn get_project(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Project>> {
    Ok(Json(state.workflow.get_project(&principal, id).await?))
}

#[utoipa::path(
    put,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = ProjectUpdateRequest,
    responses((status = 200, description = "Project status updated", body = Project))
)]
pub async fn update_project(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProjectUpdateRequest>,
) -> AppResult<Json<Project>> {
    let project = state.workflow.update_project_status(&principal, id, payload.status).await?;
    Ok(Json(project))
}

#[utoipa::path(
    delete,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = Uuid, Path, description = "Project id")),
    responses(
        (status = 204, description = "Project deleted"),
        (status = 409, description = "Project still has groups or tasks")
    )
)]
pub async fn delete_project(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.workflow.delete_project(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
