//! Guarded mutations on projects, groups, memberships and tasks.
//!
//! Every operation checks permissions through the [`ScopingEngine`] at its
//! start, applies the mutation, then hands an audit record to the sink.
//! Audit delivery never affects the outcome of the mutation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::authz::{Principal, QuotaEnforcer, ScopingEngine};
use crate::errors::{AppError, AppResult, Dependents};
use crate::events::{AuditRecord, AuditSink, Severity};
use crate::models::group::{Group, GroupMember};
use crate::models::membership::{MembershipScope, MembershipUpsertRequest, ProjectMembership, ProjectRole, ScopeKind};
use crate::models::project::{Project, ProjectCreateRequest, ProjectStatus, QuotaResponse};
use crate::models::task::{Task, TaskCreateRequest, TaskStatus, TaskUpdateRequest};
use crate::store::{DependentsOf, Repositories};

mod locks;

pub use locks::KeyedLocks;

const EDIT_REQUIREMENT: &str = "project owner or admin membership";

pub struct Workflow {
    repos: Repositories,
    scoping: ScopingEngine,
    quota: QuotaEnforcer,
    audit: Arc<dyn AuditSink>,
    locks: Arc<KeyedLocks>,
}

impl Workflow {
    pub fn new(repos: Repositories, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_locks(repos, audit, Arc::new(KeyedLocks::new()))
    }

    pub fn with_locks(repos: Repositories, audit: Arc<dyn AuditSink>, locks: Arc<KeyedLocks>) -> Self {
        Self {
            scoping: ScopingEngine::new(repos.clone()),
            quota: QuotaEnforcer::new(repos.memberships.clone()),
            repos,
            audit,
            locks,
        }
    }

    pub fn scoping(&self) -> &ScopingEngine {
        &self.scoping
    }

    pub fn quota(&self) -> &QuotaEnforcer {
        &self.quota
    }

    fn emit(&self, record: AuditRecord) {
        self.audit.record(record);
    }

    async fn require_project(&self, project_id: Uuid) -> AppResult<Project> {
        self.repos
            .projects
            .find_project(project_id)
            .await?
            .ok_or_else(|| AppError::not_found("project not found"))
    }

    async fn require_group(&self, group_id: Uuid) -> AppResult<Group> {
        self.repos
            .groups
            .find_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("group {group_id} not found")))
    }

    async fn require_task(&self, task_id: Uuid) -> AppResult<Task> {
        self.repos
            .tasks
            .find_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("task not found"))
    }

    async fn ensure_can_edit(&self, principal: &Principal, project_id: Uuid, action: &'static str) -> AppResult<()> {
        if self.scoping.can_edit_project(principal, project_id).await? {
            Ok(())
        } else {
            Err(AppError::forbidden(action, EDIT_REQUIREMENT))
        }
    }

    /// Keeps only users holding an active membership in the project.
    async fn filter_assignees(&self, project_id: Uuid, requested: &[Uuid]) -> AppResult<BTreeSet<Uuid>> {
        if requested.is_empty() {
            return Ok(BTreeSet::new());
        }

        let members: BTreeSet<Uuid> = self
            .repos
            .memberships
            .list_memberships_by_project(project_id)
            .await?
            .into_iter()
            .filter(|m| m.active)
            .map(|m| m.user_id)
            .collect();

        let (kept, dropped): (Vec<Uuid>, Vec<Uuid>) = requested.iter().copied().partition(|id| members.contains(id));
        if !dropped.is_empty() {
            tracing::info!(%project_id, dropped = ?dropped, "dropping assignees without active membership");
        }
        Ok(kept.into_iter().collect())
    }

    /// Group rules shared by creation and field updates.
    async fn check_task_group(&self, principal: &Principal, project_id: Uuid, group_id: Uuid, action: &'static str) -> AppResult<()> {
        let group = self.require_group(group_id).await?;
        if group.project_id != project_id {
            return Err(AppError::InvalidGroup { group_id, project_id });
        }
        if !principal.is_super_admin() && !self.scoping.can_view_group_tasks(principal, group_id).await? {
            return Err(AppError::forbidden(action, "visibility of the target group"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub async fn create_project(&self, principal: &Principal, request: ProjectCreateRequest) -> AppResult<Project> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("project name must not be empty"));
        }

        // count-then-insert must not interleave for the same owner
        let _guard = self.locks.lock(principal.id).await;
        self.quota.ensure_can_create(principal).await?;

        let project = Project::new(principal.id, name, request.description);
        self.repos.projects.insert_project(&project).await?;

        let membership = ProjectMembership::new(principal.id, project.id, ProjectRole::ProjectOwner, MembershipScope::All);
        self.repos.memberships.upsert_membership(&membership).await?;
        self.quota.record_project_created(principal);

        tracing::info!(project_id = %project.id, owner_id = %principal.id, "project created");
        self.emit(AuditRecord::for_entity(principal.id, "created", None, Some(&project)));
        Ok(project)
    }

    pub async fn get_project(&self, principal: &Principal, project_id: Uuid) -> AppResult<Project> {
        let project = self.require_project(project_id).await?;
        if !self.scoping.can_view_project(principal, project_id).await? {
            return Err(AppError::forbidden("project.view", "project membership or ownership"));
        }
        Ok(project)
    }

    pub async fn update_project_status(&self, principal: &Principal, project_id: Uuid, status: ProjectStatus) -> AppResult<Project> {
        let _guard = self.locks.lock(project_id).await;
        let before = self.require_project(project_id).await?;
        self.ensure_can_edit(principal, project_id, "project.update").await?;

        let mut project = before.clone();
        project.status = status;
        project.updated_at = Utc::now();
        self.repos.projects.update_project(&project).await?;

        self.emit(AuditRecord::for_entity(principal.id, "updated", Some(&before), Some(&project)));
        Ok(project)
    }

    pub async fn delete_project(&self, principal: &Principal, project_id: Uuid) -> AppResult<()> {
        let _guard = self.locks.lock(project_id).await;
        let project = self.require_project(project_id).await?;
        self.ensure_can_edit(principal, project_id, "project.delete").await?;

        let dependents = Dependents {
            groups: self.repos.groups.list_groups_by_project(project_id).await?.len() as u64,
            tasks: self.repos.tasks.count_dependents(DependentsOf::Project(project_id)).await?,
            members: 0,
        };
        if !dependents.is_empty() {
            return Err(AppError::HasDependents {
                entity: "project",
                id: project_id,
                dependents,
            });
        }

        self.repos.projects.delete_project(project_id).await?;
        tracing::info!(%project_id, "project deleted");
        self.emit(AuditRecord::for_entity(principal.id, "deleted", Some(&project), None));
        Ok(())
    }

    pub async fn quota_status(&self, principal: &Principal) -> AppResult<QuotaResponse> {
        Ok(QuotaResponse {
            owned_count: self.quota.owned_project_count(principal).await?,
            limit: self.quota.limit(),
            can_create: self.quota.can_create_project(principal).await?,
        })
    }

    // ------------------------------------------------------------------
    // Memberships
    // ------------------------------------------------------------------

    pub async fn upsert_membership(
        &self,
        principal: &Principal,
        project_id: Uuid,
        request: MembershipUpsertRequest,
    ) -> AppResult<ProjectMembership> {
        let _guard = self.locks.lock(project_id).await;
        self.require_project(project_id).await?;
        self.ensure_can_edit(principal, project_id, "membership.upsert").await?;

        if request.role == ProjectRole::SuperAdmin && !principal.is_super_admin() {
            return Err(AppError::forbidden("membership.grant_super_admin", "SUPER_ADMIN"));
        }

        let scope = match request.scope {
            ScopeKind::All => MembershipScope::All,
            ScopeKind::SpecificGroups => {
                if request.visible_group_ids.is_empty() {
                    return Err(AppError::bad_request(
                        "SPECIFIC_GROUPS scope requires at least one visible group",
                    ));
                }
                for group_id in &request.visible_group_ids {
                    let group = self.require_group(*group_id).await?;
                    if group.project_id != project_id {
                        return Err(AppError::InvalidGroup {
                            group_id: *group_id,
                            project_id,
                        });
                    }
                }
                MembershipScope::from_parts(ScopeKind::SpecificGroups, request.visible_group_ids.iter().copied())
            }
        };

        let before = self.repos.memberships.find_membership(request.user_id, project_id).await?;
        let mut membership = ProjectMembership::new(request.user_id, project_id, request.role, scope);
        membership.active = request.active.unwrap_or(true);
        if let Some(existing) = &before {
            membership.created_at = existing.created_at;
        }

        self.repos.memberships.upsert_membership(&membership).await?;
        tracing::info!(user_id = %membership.user_id, %project_id, role = %membership.role, "membership upserted");
        self.emit(AuditRecord::for_entity(principal.id, "upserted", before.as_ref(), Some(&membership)));
        Ok(membership)
    }

    pub async fn list_memberships(&self, principal: &Principal, project_id: Uuid) -> AppResult<Vec<ProjectMembership>> {
        self.get_project(principal, project_id).await?;
        self.repos.memberships.list_memberships_by_project(project_id).await
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub async fn create_group(&self, principal: &Principal, project_id: Uuid, name: &str) -> AppResult<Group> {
        let _guard = self.locks.lock(project_id).await;
        self.require_project(project_id).await?;
        self.ensure_can_edit(principal, project_id, "group.create").await?;

        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("group name must not be empty"));
        }

        let group = Group::new(project_id, name);
        self.repos.groups.insert_group(&group).await?;
        self.emit(AuditRecord::for_entity(principal.id, "created", None, Some(&group)));
        Ok(group)
    }

    pub async fn delete_group(&self, principal: &Principal, group_id: Uuid) -> AppResult<()> {
        let group = self.require_group(group_id).await?;
        let _guard = self.locks.lock(group.project_id).await;
        self.ensure_can_edit(principal, group.project_id, "group.delete").await?;

        let dependents = Dependents {
            groups: 0,
            tasks: self.repos.tasks.count_dependents(DependentsOf::Group(group_id)).await?,
            members: self.repos.groups.list_group_members(group_id).await?.len() as u64,
        };
        if !dependents.is_empty() {
            return Err(AppError::HasDependents {
                entity: "group",
                id: group_id,
                dependents,
            });
        }

        self.repos.groups.delete_group(group_id).await?;
        self.emit(AuditRecord::for_entity(principal.id, "deleted", Some(&group), None));
        Ok(())
    }

    pub async fn add_group_member(&self, principal: &Principal, group_id: Uuid, user_id: Uuid) -> AppResult<GroupMember> {
        let project_id = self.require_group(group_id).await?.project_id;
        let _guard = self.locks.lock(project_id).await;
        // the group may have been deleted while waiting for the lock
        let group = self.require_group(group_id).await?;
        self.ensure_can_edit(principal, group.project_id, "group.add_member").await?;

        let active = self
            .repos
            .memberships
            .find_membership(user_id, group.project_id)
            .await?
            .map(|m| m.active)
            .unwrap_or(false);
        if !active {
            return Err(AppError::bad_request("user has no active membership in the group's project"));
        }

        let member = GroupMember { group_id, user_id };
        self.repos.groups.add_group_member(&member).await?;
        self.emit(AuditRecord::for_entity(principal.id, "added", None, Some(&member)));
        Ok(member)
    }

    pub async fn remove_group_member(&self, principal: &Principal, group_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let group = self.require_group(group_id).await?;
        self.ensure_can_edit(principal, group.project_id, "group.remove_member").await?;

        if !self.repos.groups.remove_group_member(group_id, user_id).await? {
            return Err(AppError::not_found("group member not found"));
        }
        let member = GroupMember { group_id, user_id };
        self.emit(AuditRecord::for_entity(principal.id, "removed", Some(&member), None));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub async fn create_task(&self, principal: &Principal, project_id: Uuid, draft: TaskCreateRequest) -> AppResult<Task> {
        let _guard = self.locks.lock(project_id).await;
        self.require_project(project_id).await?;
        self.ensure_can_edit(principal, project_id, "task.create").await?;

        if let Some(group_id) = draft.group_id {
            self.check_task_group(principal, project_id, group_id, "task.create").await?;
        }

        let title = draft.title.trim();
        if title.is_empty() {
            return Err(AppError::bad_request("task title must not be empty"));
        }
        if draft.estimated_hours.is_some_and(|hours| hours < 0.0) {
            return Err(AppError::bad_request("estimated_hours must not be negative"));
        }

        let assignee_ids = self.filter_assignees(project_id, &draft.assignee_ids).await?;
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            project_id,
            group_id: draft.group_id,
            creator_id: principal.id,
            title: title.to_string(),
            description: draft.description,
            status: TaskStatus::Todo,
            priority: draft.priority.unwrap_or_default(),
            due_date: draft.due_date,
            estimated_hours: draft.estimated_hours,
            assignee_ids,
            created_at: now,
            updated_at: now,
        };

        self.repos.tasks.insert_task(&task).await?;
        tracing::info!(task_id = %task.id, %project_id, "task created");
        self.emit(AuditRecord::for_entity(principal.id, "created", None, Some(&task)));
        Ok(task)
    }

    /// Visible if the principal sees the whole project or the task's group.
    pub async fn get_task(&self, principal: &Principal, task_id: Uuid) -> AppResult<Task> {
        let task = self.require_task(task_id).await?;
        if self.scoping.has_full_visibility(principal, task.project_id).await? {
            return Ok(task);
        }
        let visible = match task.group_id {
            Some(group_id) => self.scoping.can_view_group_tasks(principal, group_id).await?,
            None => false,
        };
        if !visible {
            return Err(AppError::forbidden("task.view", "visibility of the task's group"));
        }
        Ok(task)
    }

    /// Any status may move to any other status, `DONE` included.
    pub async fn update_task_status(&self, principal: &Principal, task_id: Uuid, new_status: &str) -> AppResult<Task> {
        let new_status: TaskStatus = new_status.parse()?;

        let _guard = self.locks.lock(task_id).await;
        let mut task = self.require_task(task_id).await?;

        let involved = task.creator_id == principal.id || task.is_assignee(principal.id);
        let allowed = principal.is_super_admin()
            || self.scoping.can_edit_project(principal, task.project_id).await?
            || (involved && self.scoping.can_view_project(principal, task.project_id).await?);
        if !allowed {
            return Err(AppError::forbidden(
                "task.update_status",
                "task creator, assignee, or project owner or admin",
            ));
        }

        let old_status = task.status;
        task.status = new_status;
        task.updated_at = Utc::now();
        self.repos.tasks.update_task(&task).await?;

        tracing::info!(%task_id, from = %old_status, to = %new_status, "task status changed");
        self.emit(
            AuditRecord::new(principal.id, "task", task.id, "status_changed")
                .with_states(Some(json!({ "status": old_status })), Some(json!({ "status": new_status })))
                .with_severity(Severity::Important),
        );
        Ok(task)
    }

    /// Creators keep edit rights only while they can still see the project.
    async fn ensure_can_edit_task(&self, principal: &Principal, task: &Task, action: &'static str) -> AppResult<()> {
        let allowed = self.scoping.can_edit_project(principal, task.project_id).await?
            || (task.creator_id == principal.id && self.scoping.can_view_project(principal, task.project_id).await?);
        if allowed {
            Ok(())
        } else {
            Err(AppError::forbidden(action, "task creator, or project owner or admin"))
        }
    }

    /// Locks the project before the task, so a group move cannot interleave
    /// with a group deletion.
    pub async fn update_task_fields(&self, principal: &Principal, task_id: Uuid, patch: TaskUpdateRequest) -> AppResult<Task> {
        let project_id = self.require_task(task_id).await?.project_id;
        let _project_guard = self.locks.lock(project_id).await;
        let _guard = self.locks.lock(task_id).await;
        let before = self.require_task(task_id).await?;
        self.ensure_can_edit_task(principal, &before, "task.update_fields").await?;

        let mut task = before.clone();
        if let Some(title) = patch.title.as_deref() {
            let title = title.trim();
            if title.is_empty() {
                return Err(AppError::bad_request("task title must not be empty"));
            }
            task.title = title.to_string();
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(group_id) = patch.group_id {
            if let Some(target) = group_id.filter(|g| Some(*g) != task.group_id) {
                self.check_task_group(principal, task.project_id, target, "task.update_fields").await?;
            }
            task.group_id = group_id;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(hours) = patch.estimated_hours {
            if hours < 0.0 {
                return Err(AppError::bad_request("estimated_hours must not be negative"));
            }
            task.estimated_hours = Some(hours);
        }
        if let Some(assignees) = patch.assignee_ids.as_deref() {
            task.assignee_ids = self.filter_assignees(task.project_id, assignees).await?;
        }

        task.updated_at = Utc::now();
        self.repos.tasks.update_task(&task).await?;
        self.emit(AuditRecord::for_entity(principal.id, "updated", Some(&before), Some(&task)));
        Ok(task)
    }

    pub async fn delete_task(&self, principal: &Principal, task_id: Uuid) -> AppResult<()> {
        let _guard = self.locks.lock(task_id).await;
        let task = self.require_task(task_id).await?;
        self.ensure_can_edit_task(principal, &task, "task.delete").await?;

        self.repos.tasks.delete_task(task_id).await?;
        tracing::info!(%task_id, "task deleted");
        self.emit(AuditRecord::for_entity(principal.id, "deleted", Some(&task), None));
        Ok(())
    }
}
