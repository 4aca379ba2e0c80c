use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{DependentsOf, GroupRepository, MembershipRepository, ProjectRepository, TaskRepository};
use crate::db::row_parsers::{encode_group_ids, group_from_row, membership_from_row, project_from_row, task_from_row};
use crate::errors::{AppError, AppResult};
use crate::models::group::{Group, GroupMember};
use crate::models::membership::ProjectMembership;
use crate::models::project::Project;
use crate::models::task::Task;

const PROJECT_COLUMNS: &str = "id, owner_id, name, description, status, created_at, updated_at";
const MEMBERSHIP_COLUMNS: &str = "user_id, project_id, role, scope, visible_group_ids, active, created_at, updated_at";
const GROUP_COLUMNS: &str = "id, project_id, name, created_at";
const TASK_COLUMNS: &str =
    "id, project_id, group_id, creator_id, title, description, status, priority, due_date, estimated_hours, created_at, updated_at";

/// SQLite-backed store. Ids and timestamps are stored as text.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_assignees(&self, task_id: Uuid) -> AppResult<BTreeSet<Uuid>> {
        let rows = sqlx::query("SELECT user_id FROM task_assignees WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let raw: String = row.try_get("user_id")?;
                Uuid::parse_str(&raw).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
            })
            .collect()
    }

    async fn with_assignees(&self, mut task: Task) -> AppResult<Task> {
        task.assignee_ids = self.load_assignees(task.id).await?;
        Ok(task)
    }

    async fn replace_assignees(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        task_id: Uuid,
        assignees: &BTreeSet<Uuid>,
    ) -> AppResult<()> {
        sqlx::query("DELETE FROM task_assignees WHERE task_id = ?")
            .bind(task_id.to_string())
            .execute(&mut **tx)
            .await?;

        for user_id in assignees {
            sqlx::query("INSERT INTO task_assignees (task_id, user_id) VALUES (?, ?)")
                .bind(task_id.to_string())
                .bind(user_id.to_string())
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectRepository for SqliteStore {
    async fn find_project(&self, project_id: Uuid) -> AppResult<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(project_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(project_from_row).transpose()
    }

    async fn list_projects(&self) -> AppResult<Vec<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(project_from_row).collect()
    }

    async fn insert_project(&self, project: &Project) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO projects (id, owner_id, name, description, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(project.owner_id.to_string())
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.status.as_str())
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_project(&self, project: &Project) -> AppResult<()> {
        let affected = sqlx::query("UPDATE projects SET name = ?, description = ?, status = ?, updated_at = ? WHERE id = ?")
            .bind(&project.name)
            .bind(&project.description)
            .bind(project.status.as_str())
            .bind(project.updated_at.to_rfc3339())
            .bind(project.id.to_string())
            .execute(&self.pool)
            .await?;

        if affected.rows_affected() == 0 {
            return Err(AppError::not_found("project not found"));
        }
        Ok(())
    }

    async fn delete_project(&self, project_id: Uuid) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM project_memberships WHERE project_id = ?")
            .bind(project_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(project_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MembershipRepository for SqliteStore {
    async fn find_membership(&self, user_id: Uuid, project_id: Uuid) -> AppResult<Option<ProjectMembership>> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM project_memberships WHERE user_id = ? AND project_id = ?");
        let row = sqlx::query(&sql)
            .bind(user_id.to_string())
            .bind(project_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(membership_from_row).transpose()
    }

    async fn list_memberships_by_user(&self, user_id: Uuid) -> AppResult<Vec<ProjectMembership>> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM project_memberships WHERE user_id = ? ORDER BY created_at");
        let rows = sqlx::query(&sql)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn list_memberships_by_project(&self, project_id: Uuid) -> AppResult<Vec<ProjectMembership>> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM project_memberships WHERE project_id = ? ORDER BY created_at");
        let rows = sqlx::query(&sql)
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn upsert_membership(&self, membership: &ProjectMembership) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO project_memberships (user_id, project_id, role, scope, visible_group_ids, active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (user_id, project_id) DO UPDATE SET \
             role = excluded.role, scope = excluded.scope, visible_group_ids = excluded.visible_group_ids, \
             active = excluded.active, updated_at = excluded.updated_at",
        )
        .bind(membership.user_id.to_string())
        .bind(membership.project_id.to_string())
        .bind(membership.role.as_str())
        .bind(membership.scope.kind().as_str())
        .bind(encode_group_ids(&membership.scope))
        .bind(membership.active as i64)
        .bind(membership.created_at.to_rfc3339())
        .bind(membership.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_owned_projects(&self, user_id: Uuid) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE owner_id = ?")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl GroupRepository for SqliteStore {
    async fn find_group(&self, group_id: Uuid) -> AppResult<Option<Group>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM task_groups WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(group_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn list_groups_by_project(&self, project_id: Uuid) -> AppResult<Vec<Group>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM task_groups WHERE project_id = ? ORDER BY name");
        let rows = sqlx::query(&sql)
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn insert_group(&self, group: &Group) -> AppResult<()> {
        sqlx::query("INSERT INTO task_groups (id, project_id, name, created_at) VALUES (?, ?, ?, ?)")
            .bind(group.id.to_string())
            .bind(group.project_id.to_string())
            .bind(&group.name)
            .bind(group.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_group(&self, group_id: Uuid) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM task_groups WHERE id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_group_member(&self, member: &GroupMember) -> AppResult<()> {
        sqlx::query("INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?, ?)")
            .bind(member.group_id.to_string())
            .bind(member.user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_group_member(&self, group_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let affected = sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(affected.rows_affected() > 0)
    }

    async fn list_group_members(&self, group_id: Uuid) -> AppResult<Vec<GroupMember>> {
        let rows = sqlx::query("SELECT user_id FROM group_members WHERE group_id = ? ORDER BY user_id")
            .bind(group_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let raw: String = row.try_get("user_id")?;
                let user_id = Uuid::parse_str(&raw).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))?;
                Ok(GroupMember { group_id, user_id })
            })
            .collect()
    }
}

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn find_task(&self, task_id: Uuid) -> AppResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.with_assignees(task_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn list_tasks_by_project(&self, project_id: Uuid) -> AppResult<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ? ORDER BY created_at");
        let rows = sqlx::query(&sql)
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            tasks.push(self.with_assignees(task_from_row(row)?).await?);
        }
        Ok(tasks)
    }

    async fn insert_task(&self, task: &Task) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO tasks (id, project_id, group_id, creator_id, title, description, status, priority, due_date, estimated_hours, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.project_id.to_string())
        .bind(task.group_id.map(|g| g.to_string()))
        .bind(task.creator_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.due_date.map(|d| d.to_rfc3339()))
        .bind(task.estimated_hours)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        Self::replace_assignees(&mut tx, task.id, &task.assignee_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let affected = sqlx::query(
            "UPDATE tasks SET group_id = ?, title = ?, description = ?, status = ?, priority = ?, due_date = ?, estimated_hours = ?, updated_at = ? WHERE id = ?",
        )
        .bind(task.group_id.map(|g| g.to_string()))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.due_date.map(|d| d.to_rfc3339()))
        .bind(task.estimated_hours)
        .bind(task.updated_at.to_rfc3339())
        .bind(task.id.to_string())
        .execute(&mut *tx)
        .await?;

        if affected.rows_affected() == 0 {
            return Err(AppError::not_found("task not found"));
        }

        Self::replace_assignees(&mut tx, task.id, &task.assignee_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_task(&self, task_id: Uuid) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM task_assignees WHERE task_id = ?")
            .bind(task_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count_dependents(&self, parent: DependentsOf) -> AppResult<u64> {
        let (sql, id) = match parent {
            DependentsOf::Group(id) => ("SELECT COUNT(*) FROM tasks WHERE group_id = ?", id),
            DependentsOf::Project(id) => ("SELECT COUNT(*) FROM tasks WHERE project_id = ?", id),
        };
        let count: i64 = sqlx::query_scalar(sql).bind(id.to_string()).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}
