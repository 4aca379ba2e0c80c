use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::task::{Task, TaskCreateRequest, TaskStatusRequest, TaskUpdateRequest};

#[utoipa::path(
    get,
    path = "/projects/{id}/tasks",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Tasks visible to the caller", body = [Task]))
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<Task>>> {
    Ok(Json(state.workflow.scoping().visible_tasks(&principal, project_id).await?))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/tasks",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = TaskCreateRequest,
    responses(
        (status = 201, description = "Task created in TODO", body = Task),
        (status = 422, description = "Group belongs to another project")
    )
)]
pub async fn create_task(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let task = state.workflow.create_task(&principal, project_id, payload).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 200, description = "Task detail", body = Task))
)]
pub async fn get_task(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    Ok(Json(state.workflow.get_task(&principal, id).await?))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskUpdateRequest,
    responses((status = 200, description = "Task fields updated", body = Task))
)]
pub async fn update_task(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TaskUpdateRequest>,
) -> AppResult<Json<Task>> {
    if payload.is_empty() {
        return Err(AppError::bad_request("update contains no fields"));
    }
    Ok(Json(state.workflow.update_task_fields(&principal, id, payload).await?))
}

#[utoipa::path(
    put,
    path = "/tasks/{id}/status",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    request_body = TaskStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = Task),
        (status = 422, description = "Unknown status")
    )
)]
pub async fn update_status(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<TaskStatusRequest>,
) -> AppResult<Json<Task>> {
    Ok(Json(state.workflow.update_task_status(&principal, id, &payload.status).await?))
}

#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    tag = "Tasks",
    params(("id" = Uuid, Path, description = "Task id")),
    responses((status = 204, description = "Task deleted"))
)]
pub async fn delete_task(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.workflow.delete_task(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
