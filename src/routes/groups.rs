use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::group::{Group, GroupCreateRequest, GroupMember, GroupMemberRequest};
use crate::models::task::Task;

#[utoipa::path(
    get,
    path = "/projects/{id}/groups",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Groups visible to the caller", body = [Group]))
)]
pub async fn list_groups(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<Group>>> {
    Ok(Json(state.workflow.scoping().visible_groups(&principal, project_id).await?))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/groups",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = GroupCreateRequest,
    responses((status = 201, description = "Group created", body = Group))
)]
pub async fn create_group(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<GroupCreateRequest>,
) -> AppResult<(StatusCode, Json<Group>)> {
    let group = state.workflow.create_group(&principal, project_id, &payload.name).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

#[utoipa::path(
    delete,
    path = "/groups/{id}",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    responses(
        (status = 204, description = "Group deleted"),
        (status = 409, description = "Group still has tasks or members")
    )
)]
pub async fn delete_group(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.workflow.delete_group(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/groups/{id}/tasks",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    responses(
        (status = 200, description = "Tasks of the group", body = [Task]),
        (status = 403, description = "Group outside the caller's scope")
    )
)]
pub async fn group_tasks(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Task>>> {
    Ok(Json(state.workflow.scoping().group_tasks(&principal, id).await?))
}

#[utoipa::path(
    post,
    path = "/groups/{id}/members",
    tag = "Groups",
    params(("id" = Uuid, Path, description = "Group id")),
    request_body = GroupMemberRequest,
    responses((status = 201, description = "User added to the group", body = GroupMember))
)]
pub async fn add_group_member(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<GroupMemberRequest>,
) -> AppResult<(StatusCode, Json<GroupMember>)> {
    let member = state.workflow.add_group_member(&principal, id, payload.user_id).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

#[utoipa::path(
    delete,
    path = "/groups/{id}/members/{user_id}",
    tag = "Groups",
    params(
        ("id" = Uuid, Path, description = "Group id"),
        ("user_id" = Uuid, Path, description = "User id")
    ),
    responses((status = 204, description = "User removed from the group"))
)]
pub async fn remove_group_member(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    state.workflow.remove_group_member(&principal, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
