use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::membership::{MembershipUpsertRequest, MembershipView};

#[utoipa::path(
    get,
    path = "/projects/{id}/members",
    tag = "Memberships",
    params(("id" = Uuid, Path, description = "Project id")),
    responses((status = 200, description = "Project memberships", body = [MembershipView]))
)]
pub async fn list_members(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<MembershipView>>> {
    let memberships = state.workflow.list_memberships(&principal, project_id).await?;
    Ok(Json(memberships.into_iter().map(MembershipView::from).collect()))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/members",
    tag = "Memberships",
    params(("id" = Uuid, Path, description = "Project id")),
    request_body = MembershipUpsertRequest,
    responses(
        (status = 200, description = "Membership created or replaced", body = MembershipView),
        (status = 400, description = "Specific-groups scope without groups"),
        (status = 422, description = "Visible group belongs to another project")
    )
)]
pub async fn upsert_member(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<MembershipUpsertRequest>,
) -> AppResult<Json<MembershipView>> {
    let membership = state.workflow.upsert_membership(&principal, project_id, payload).await?;
    Ok(Json(membership.into()))
}
