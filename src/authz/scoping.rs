use std::collections::BTreeSet;

use uuid::Uuid;

use super::principal::Principal;
use crate::errors::{AppError, AppResult};
use crate::models::group::Group;
use crate::models::membership::{MembershipScope, ProjectMembership, ProjectRole};
use crate::models::project::Project;
use crate::models::task::Task;
use crate::store::Repositories;

/// Minimum membership role that grants edit rights on a project.
pub const EDIT_ROLE: ProjectRole = ProjectRole::ProjectOwner;

/// Outcome of resolving which groups a principal may see in a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupVisibility {
    /// No active membership: viewing is denied.
    NoMembership,
    /// Visible groups. May be empty when a restricted scope names no
    /// existing group.
    Groups(BTreeSet<Uuid>),
}

impl GroupVisibility {
    pub fn into_group_ids(self) -> BTreeSet<Uuid> {
        match self {
            GroupVisibility::NoMembership => BTreeSet::new(),
            GroupVisibility::Groups(ids) => ids,
        }
    }
}

/// Read-only oracle answering visibility and edit questions.
///
/// Every check evaluates `SUPER_ADMIN` first, before touching the store.
/// Nothing here mutates state or emits audit records.
#[derive(Clone)]
pub struct ScopingEngine {
    repos: Repositories,
}

impl ScopingEngine {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    async fn active_membership(&self, user_id: Uuid, project_id: Uuid) -> AppResult<Option<ProjectMembership>> {
        let membership = self.repos.memberships.find_membership(user_id, project_id).await?;
        Ok(membership.filter(|m| m.active))
    }

    async fn is_owner(&self, principal: &Principal, project_id: Uuid) -> AppResult<bool> {
        let project = self.repos.projects.find_project(project_id).await?;
        Ok(project.map(|p| p.owner_id == principal.id).unwrap_or(false))
    }

    pub async fn can_view_project(&self, principal: &Principal, project_id: Uuid) -> AppResult<bool> {
        if principal.is_super_admin() {
            return Ok(true);
        }

        if self.active_membership(principal.id, project_id).await?.is_some() {
            return Ok(true);
        }

        let owner = self.is_owner(principal, project_id).await?;
        tracing::debug!(user_id = %principal.id, %project_id, owner, "view project without membership");
        Ok(owner)
    }

    pub async fn can_edit_project(&self, principal: &Principal, project_id: Uuid) -> AppResult<bool> {
        if principal.is_super_admin() {
            return Ok(true);
        }

        if let Some(membership) = self.active_membership(principal.id, project_id).await? {
            if membership.role.satisfies(EDIT_ROLE) {
                return Ok(true);
            }
        }

        let owner = self.is_owner(principal, project_id).await?;
        if !owner {
            tracing::debug!(user_id = %principal.id, %project_id, "edit project denied");
        }
        Ok(owner)
    }

    /// Fails with `NotFound` when the group does not exist.
    pub async fn can_view_group_tasks(&self, principal: &Principal, group_id: Uuid) -> AppResult<bool> {
        let group = self
            .repos
            .groups
            .find_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("group {group_id} not found")))?;

        if principal.is_super_admin() {
            return Ok(true);
        }

        let allowed = match self.active_membership(principal.id, group.project_id).await? {
            Some(membership) => {
                warn_on_empty_scope(&membership);
                membership.scope.allows_group(group_id)
            }
            None => false,
        };

        tracing::debug!(user_id = %principal.id, %group_id, allowed, "group task visibility");
        Ok(allowed)
    }

    /// Like [`Self::resolve_visible_group_ids`] but keeps "no membership"
    /// apart from "membership that resolves to zero groups".
    pub async fn group_visibility(&self, principal: &Principal, project_id: Uuid) -> AppResult<GroupVisibility> {
        if principal.is_super_admin() {
            return Ok(GroupVisibility::Groups(self.project_group_ids(project_id).await?));
        }

        let membership = match self.active_membership(principal.id, project_id).await? {
            Some(m) => m,
            None => return Ok(GroupVisibility::NoMembership),
        };

        let existing = self.project_group_ids(project_id).await?;
        let visible = match &membership.scope {
            MembershipScope::All => existing,
            MembershipScope::SpecificGroups(allowed) => {
                warn_on_empty_scope(&membership);
                // Stale ids (groups deleted after the grant) drop out here.
                allowed.intersection(&existing).copied().collect()
            }
        };

        Ok(GroupVisibility::Groups(visible))
    }

    pub async fn resolve_visible_group_ids(&self, principal: &Principal, project_id: Uuid) -> AppResult<BTreeSet<Uuid>> {
        Ok(self.group_visibility(principal, project_id).await?.into_group_ids())
    }

    async fn project_group_ids(&self, project_id: Uuid) -> AppResult<BTreeSet<Uuid>> {
        let groups = self.repos.groups.list_groups_by_project(project_id).await?;
        Ok(groups.into_iter().map(|g| g.id).collect())
    }

    /// Whether the principal sees every task of the project, ungrouped ones included.
    pub async fn has_full_visibility(&self, principal: &Principal, project_id: Uuid) -> AppResult<bool> {
        if principal.is_super_admin() {
            return Ok(true);
        }
        let membership = self.active_membership(principal.id, project_id).await?;
        if matches!(membership, Some(m) if m.scope == MembershipScope::All) {
            return Ok(true);
        }
        // the owner sees everything even after its own membership was narrowed
        self.is_owner(principal, project_id).await
    }

    pub async fn list_visible_projects(&self, principal: &Principal) -> AppResult<Vec<Project>> {
        let projects = self.repos.projects.list_projects().await?;
        if principal.is_super_admin() {
            return Ok(projects);
        }

        let member_of: BTreeSet<Uuid> = self
            .repos
            .memberships
            .list_memberships_by_user(principal.id)
            .await?
            .into_iter()
            .filter(|m| m.active)
            .map(|m| m.project_id)
            .collect();

        Ok(projects
            .into_iter()
            .filter(|p| p.owner_id == principal.id || member_of.contains(&p.id))
            .collect())
    }

    pub async fn visible_groups(&self, principal: &Principal, project_id: Uuid) -> AppResult<Vec<Group>> {
        self.ensure_can_view_project(principal, project_id).await?;
        let visible = self.resolve_visible_group_ids(principal, project_id).await?;
        let groups = self.repos.groups.list_groups_by_project(project_id).await?;
        Ok(groups.into_iter().filter(|g| visible.contains(&g.id)).collect())
    }

    /// Tasks of a project filtered to what the principal may see.
    pub async fn visible_tasks(&self, principal: &Principal, project_id: Uuid) -> AppResult<Vec<Task>> {
        self.ensure_can_view_project(principal, project_id).await?;

        let tasks = self.repos.tasks.list_tasks_by_project(project_id).await?;
        if self.has_full_visibility(principal, project_id).await? {
            return Ok(tasks);
        }

        let visible = self.resolve_visible_group_ids(principal, project_id).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.group_id.map(|g| visible.contains(&g)).unwrap_or(false))
            .collect())
    }

    /// Tasks of a single group; `Forbidden` when the group is outside the principal's scope.
    pub async fn group_tasks(&self, principal: &Principal, group_id: Uuid) -> AppResult<Vec<Task>> {
        if !self.can_view_group_tasks(principal, group_id).await? {
            return Err(AppError::forbidden("group.view_tasks", "membership with visibility of this group"));
        }

        let group = self
            .repos
            .groups
            .find_group(group_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("group {group_id} not found")))?;

        let tasks = self.repos.tasks.list_tasks_by_project(group.project_id).await?;
        Ok(tasks.into_iter().filter(|t| t.group_id == Some(group_id)).collect())
    }

    async fn ensure_can_view_project(&self, principal: &Principal, project_id: Uuid) -> AppResult<()> {
        if self.repos.projects.find_project(project_id).await?.is_none() {
            return Err(AppError::not_found("project not found"));
        }
        if !self.can_view_project(principal, project_id).await? {
            return Err(AppError::forbidden("project.view", "project membership or ownership"));
        }
        Ok(())
    }
}

fn warn_on_empty_scope(membership: &ProjectMembership) {
    if let MembershipScope::SpecificGroups(ids) = &membership.scope {
        if ids.is_empty() {
            tracing::warn!(
                user_id = %membership.user_id,
                project_id = %membership.project_id,
                "SPECIFIC_GROUPS membership without groups; sees nothing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::authz::GlobalRole;
    use crate::models::task::{TaskPriority, TaskStatus};
    use crate::store::{GroupRepository, MembershipRepository, MemoryStore, ProjectRepository, TaskRepository};

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: ScopingEngine,
        owner: Principal,
        project: Project,
        g1: Group,
        g2: Group,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let engine = ScopingEngine::new(Repositories::from_store(store.clone()));
        let owner = Principal::user(Uuid::new_v4());
        let project = Project::new(owner.id, "P1", None);
        store.insert_project(&project).await.unwrap();
        store
            .upsert_membership(&ProjectMembership::new(owner.id, project.id, ProjectRole::ProjectOwner, MembershipScope::All))
            .await
            .unwrap();

        let g1 = Group::new(project.id, "G1");
        let g2 = Group::new(project.id, "G2");
        store.insert_group(&g1).await.unwrap();
        store.insert_group(&g2).await.unwrap();

        Fixture { store, engine, owner, project, g1, g2 }
    }

    async fn add_member(f: &Fixture, role: ProjectRole, scope: MembershipScope) -> Principal {
        let user = Principal::user(Uuid::new_v4());
        f.store
            .upsert_membership(&ProjectMembership::new(user.id, f.project.id, role, scope))
            .await
            .unwrap();
        user
    }

    fn task_in(f: &Fixture, group_id: Option<Uuid>) -> Task {
        let now = chrono::Utc::now();
        Task {
            id: Uuid::new_v4(),
            project_id: f.project.id,
            group_id,
            creator_id: f.owner.id,
            title: "t".into(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: None,
            estimated_hours: None,
            assignee_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn super_admin_passes_every_check_without_membership() {
        let f = fixture().await;
        let admin = Principal::super_admin(Uuid::new_v4());

        assert!(f.engine.can_view_project(&admin, f.project.id).await.unwrap());
        assert!(f.engine.can_edit_project(&admin, f.project.id).await.unwrap());
        assert!(f.engine.can_view_group_tasks(&admin, f.g2.id).await.unwrap());
        let visible = f.engine.resolve_visible_group_ids(&admin, f.project.id).await.unwrap();
        assert_eq!(visible, [f.g1.id, f.g2.id].into_iter().collect());
    }

    #[tokio::test]
    async fn super_admin_views_unknown_project() {
        let f = fixture().await;
        let admin = Principal::super_admin(Uuid::new_v4());
        assert!(f.engine.can_view_project(&admin, Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn outsider_cannot_view_project() {
        let f = fixture().await;
        let outsider = Principal::user(Uuid::new_v4());
        assert!(!f.engine.can_view_project(&outsider, f.project.id).await.unwrap());
        assert!(!f.engine.can_edit_project(&outsider, f.project.id).await.unwrap());
    }

    #[tokio::test]
    async fn global_admin_gets_no_bypass() {
        let f = fixture().await;
        let admin = Principal::new(Uuid::new_v4(), GlobalRole::Admin);
        assert!(!f.engine.can_view_project(&admin, f.project.id).await.unwrap());
    }

    #[tokio::test]
    async fn owner_without_membership_can_view_and_edit() {
        let f = fixture().await;
        let mut membership = f.store.find_membership(f.owner.id, f.project.id).await.unwrap().unwrap();
        membership.active = false;
        f.store.upsert_membership(&membership).await.unwrap();

        assert!(f.engine.can_view_project(&f.owner, f.project.id).await.unwrap());
        assert!(f.engine.can_edit_project(&f.owner, f.project.id).await.unwrap());
        assert_eq!(
            f.engine.group_visibility(&f.owner, f.project.id).await.unwrap(),
            GroupVisibility::NoMembership
        );
    }

    #[tokio::test]
    async fn view_project_is_stable_across_calls() {
        let f = fixture().await;
        let member = add_member(&f, ProjectRole::ProjectMember, MembershipScope::All).await;
        let first = f.engine.can_view_project(&member, f.project.id).await.unwrap();
        let second = f.engine.can_view_project(&member, f.project.id).await.unwrap();
        assert!(first);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn inactive_membership_is_ignored() {
        let f = fixture().await;
        let member = add_member(&f, ProjectRole::Admin, MembershipScope::All).await;
        let mut m = f.store.find_membership(member.id, f.project.id).await.unwrap().unwrap();
        m.active = false;
        f.store.upsert_membership(&m).await.unwrap();

        assert!(!f.engine.can_view_project(&member, f.project.id).await.unwrap());
        assert!(!f.engine.can_edit_project(&member, f.project.id).await.unwrap());
        assert!(!f.engine.can_view_group_tasks(&member, f.g1.id).await.unwrap());
    }

    #[tokio::test]
    async fn edit_requires_owner_level_role() {
        let f = fixture().await;
        let member = add_member(&f, ProjectRole::ProjectMember, MembershipScope::All).await;
        let admin = add_member(&f, ProjectRole::Admin, MembershipScope::All).await;
        let as_member_super = add_member(&f, ProjectRole::SuperAdmin, MembershipScope::All).await;

        assert!(!f.engine.can_edit_project(&member, f.project.id).await.unwrap());
        assert!(f.engine.can_edit_project(&admin, f.project.id).await.unwrap());
        assert!(f.engine.can_edit_project(&as_member_super, f.project.id).await.unwrap());
    }

    #[tokio::test]
    async fn specific_groups_scope_limits_group_tasks() {
        let f = fixture().await;
        let scope = MembershipScope::SpecificGroups([f.g1.id].into_iter().collect());
        let member = add_member(&f, ProjectRole::ProjectMember, scope).await;

        assert!(f.engine.can_view_group_tasks(&member, f.g1.id).await.unwrap());
        assert!(!f.engine.can_view_group_tasks(&member, f.g2.id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let f = fixture().await;
        let admin = Principal::super_admin(Uuid::new_v4());
        let err = f.engine.can_view_group_tasks(&admin, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn resolve_drops_stale_group_ids() {
        let f = fixture().await;
        let stale = Uuid::new_v4();
        let scope = MembershipScope::SpecificGroups([f.g1.id, stale].into_iter().collect());
        let member = add_member(&f, ProjectRole::ProjectMember, scope).await;

        let visible = f.engine.resolve_visible_group_ids(&member, f.project.id).await.unwrap();
        assert_eq!(visible, [f.g1.id].into_iter().collect());
    }

    #[tokio::test]
    async fn resolve_returns_all_groups_for_all_scope() {
        let f = fixture().await;
        let member = add_member(&f, ProjectRole::ProjectMember, MembershipScope::All).await;
        let visible = f.engine.resolve_visible_group_ids(&member, f.project.id).await.unwrap();
        assert_eq!(visible.len(), 2);
    }

    #[tokio::test]
    async fn no_membership_and_empty_scope_resolve_alike() {
        let f = fixture().await;
        let outsider = Principal::user(Uuid::new_v4());
        let empty = add_member(&f, ProjectRole::ProjectMember, MembershipScope::SpecificGroups(BTreeSet::new())).await;

        assert!(f.engine.resolve_visible_group_ids(&outsider, f.project.id).await.unwrap().is_empty());
        assert!(f.engine.resolve_visible_group_ids(&empty, f.project.id).await.unwrap().is_empty());
        assert_eq!(
            f.engine.group_visibility(&outsider, f.project.id).await.unwrap(),
            GroupVisibility::NoMembership
        );
        assert_eq!(
            f.engine.group_visibility(&empty, f.project.id).await.unwrap(),
            GroupVisibility::Groups(BTreeSet::new())
        );
    }

    #[tokio::test]
    async fn restricted_member_sees_only_their_group_tasks() {
        let f = fixture().await;
        let scope = MembershipScope::SpecificGroups([f.g1.id].into_iter().collect());
        let member = add_member(&f, ProjectRole::ProjectMember, scope).await;

        let t1 = task_in(&f, Some(f.g1.id));
        let t2 = task_in(&f, Some(f.g2.id));
        let loose = task_in(&f, None);
        for t in [&t1, &t2, &loose] {
            f.store.insert_task(t).await.unwrap();
        }

        let err = f.engine.group_tasks(&member, f.g2.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let g1_tasks = f.engine.group_tasks(&member, f.g1.id).await.unwrap();
        assert_eq!(g1_tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![t1.id]);

        let visible = f.engine.visible_tasks(&member, f.project.id).await.unwrap();
        assert_eq!(visible.iter().map(|t| t.id).collect::<Vec<_>>(), vec![t1.id]);

        let everything = f.engine.visible_tasks(&f.owner, f.project.id).await.unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn visible_projects_include_owned_and_member_projects() {
        let f = fixture().await;
        let member = add_member(&f, ProjectRole::ProjectMember, MembershipScope::All).await;
        let other = Project::new(Uuid::new_v4(), "elsewhere", None);
        f.store.insert_project(&other).await.unwrap();

        let seen = f.engine.list_visible_projects(&member).await.unwrap();
        assert_eq!(seen.iter().map(|p| p.id).collect::<Vec<_>>(), vec![f.project.id]);

        let admin = Principal::super_admin(Uuid::new_v4());
        assert_eq!(f.engine.list_visible_projects(&admin).await.unwrap().len(), 2);
    }
}
