use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::group::Group;
use crate::models::membership::{MembershipScope, ProjectMembership, ScopeKind};
use crate::models::project::Project;
use crate::models::task::Task;

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format, optional fractional seconds
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range"))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s.trim()).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

fn get<T>(row: &SqliteRow, col: &str) -> Result<T, AppError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(col).map_err(|e| AppError::internal(format!("missing {}: {}", col, e)))
}

/// Parses the stored JSON array of group ids. Done once per row so checks
/// never touch the raw text.
pub fn parse_group_ids(raw: &str) -> Result<BTreeSet<Uuid>, AppError> {
    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    let ids: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| AppError::internal(format!("invalid visible_group_ids: {}", e)))?;
    ids.iter().map(|s| parse_uuid(s)).collect()
}

pub fn encode_group_ids(scope: &MembershipScope) -> String {
    let ids: Vec<String> = scope.visible_group_ids().iter().map(Uuid::to_string).collect();
    serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string())
}

pub fn project_from_row(row: &SqliteRow) -> Result<Project, AppError> {
    let id: String = get(row, "id")?;
    let owner_id: String = get(row, "owner_id")?;
    let status: String = get(row, "status")?;
    let created_at: String = get(row, "created_at")?;
    let updated_at: String = get(row, "updated_at")?;

    Ok(Project {
        id: parse_uuid(&id)?,
        owner_id: parse_uuid(&owner_id)?,
        name: get(row, "name")?,
        description: get(row, "description")?,
        status: status.parse().map_err(|_| AppError::internal(format!("invalid project status: {}", status)))?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

pub fn membership_from_row(row: &SqliteRow) -> Result<ProjectMembership, AppError> {
    let user_id: String = get(row, "user_id")?;
    let project_id: String = get(row, "project_id")?;
    let role: String = get(row, "role")?;
    let scope: String = get(row, "scope")?;
    let visible_group_ids: String = get(row, "visible_group_ids")?;
    let active: i64 = get(row, "active")?;
    let created_at: String = get(row, "created_at")?;
    let updated_at: String = get(row, "updated_at")?;

    let kind: ScopeKind = scope
        .parse()
        .map_err(|_| AppError::internal(format!("invalid membership scope: {}", scope)))?;

    Ok(ProjectMembership {
        user_id: parse_uuid(&user_id)?,
        project_id: parse_uuid(&project_id)?,
        role: role.parse().map_err(|_| AppError::internal(format!("invalid membership role: {}", role)))?,
        scope: MembershipScope::from_parts(kind, parse_group_ids(&visible_group_ids)?),
        active: active != 0,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

pub fn group_from_row(row: &SqliteRow) -> Result<Group, AppError> {
    let id: String = get(row, "id")?;
    let project_id: String = get(row, "project_id")?;
    let created_at: String = get(row, "created_at")?;

    Ok(Group {
        id: parse_uuid(&id)?,
        project_id: parse_uuid(&project_id)?,
        name: get(row, "name")?,
        created_at: parse_datetime(&created_at)?,
    })
}

/// Task columns only; assignees live in `task_assignees` and are attached by the caller.
pub fn task_from_row(row: &SqliteRow) -> Result<Task, AppError> {
    let id: String = get(row, "id")?;
    let project_id: String = get(row, "project_id")?;
    let group_id: Option<String> = get(row, "group_id")?;
    let creator_id: String = get(row, "creator_id")?;
    let status: String = get(row, "status")?;
    let priority: String = get(row, "priority")?;
    let due_date: Option<String> = get(row, "due_date")?;
    let created_at: String = get(row, "created_at")?;
    let updated_at: String = get(row, "updated_at")?;

    Ok(Task {
        id: parse_uuid(&id)?,
        project_id: parse_uuid(&project_id)?,
        group_id: group_id.as_deref().map(parse_uuid).transpose()?,
        creator_id: parse_uuid(&creator_id)?,
        title: get(row, "title")?,
        description: get(row, "description")?,
        status: status.parse().map_err(|_| AppError::internal(format!("invalid task status: {}", status)))?,
        priority: priority.parse().map_err(|_| AppError::internal(format!("invalid task priority: {}", priority)))?,
        due_date: parse_opt_datetime(due_date)?,
        estimated_hours: get(row, "estimated_hours")?,
        assignee_ids: BTreeSet::new(),
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}
