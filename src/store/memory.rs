use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DependentsOf, GroupRepository, MembershipRepository, ProjectRepository, TaskRepository};
use crate::errors::{AppError, AppResult};
use crate::models::group::{Group, GroupMember};
use crate::models::membership::ProjectMembership;
use crate::models::project::Project;
use crate::models::task::Task;

#[derive(Debug, Default)]
struct State {
    projects: HashMap<Uuid, Project>,
    memberships: HashMap<(Uuid, Uuid), ProjectMembership>,
    groups: HashMap<Uuid, Group>,
    group_members: BTreeSet<(Uuid, Uuid)>,
    tasks: HashMap<Uuid, Task>,
}

/// In-memory store implementing every repository trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectRepository for MemoryStore {
    async fn find_project(&self, project_id: Uuid) -> AppResult<Option<Project>> {
        Ok(self.state.read().await.projects.get(&project_id).cloned())
    }

    async fn list_projects(&self) -> AppResult<Vec<Project>> {
        let state = self.state.read().await;
        let mut projects: Vec<Project> = state.projects.values().cloned().collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn insert_project(&self, project: &Project) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.projects.contains_key(&project.id) {
            return Err(AppError::internal(format!("duplicate project id {}", project.id)));
        }
        state.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn update_project(&self, project: &Project) -> AppResult<()> {
        let mut state = self.state.write().await;
        match state.projects.get_mut(&project.id) {
            Some(existing) => {
                *existing = project.clone();
                Ok(())
            }
            None => Err(AppError::not_found("project not found")),
        }
    }

    async fn delete_project(&self, project_id: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.projects.remove(&project_id);
        state.memberships.retain(|(_, pid), _| *pid != project_id);
        Ok(())
    }
}

#[async_trait]
impl MembershipRepository for MemoryStore {
    async fn find_membership(&self, user_id: Uuid, project_id: Uuid) -> AppResult<Option<ProjectMembership>> {
        Ok(self.state.read().await.memberships.get(&(user_id, project_id)).cloned())
    }

    async fn list_memberships_by_user(&self, user_id: Uuid) -> AppResult<Vec<ProjectMembership>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_memberships_by_project(&self, project_id: Uuid) -> AppResult<Vec<ProjectMembership>> {
        let state = self.state.read().await;
        let mut rows: Vec<ProjectMembership> = state
            .memberships
            .values()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn upsert_membership(&self, membership: &ProjectMembership) -> AppResult<()> {
        let mut state = self.state.write().await;
        let key = (membership.user_id, membership.project_id);
        let mut row = membership.clone();
        if let Some(existing) = state.memberships.get(&key) {
            row.created_at = existing.created_at;
        }
        state.memberships.insert(key, row);
        Ok(())
    }

    async fn count_owned_projects(&self, user_id: Uuid) -> AppResult<i64> {
        let state = self.state.read().await;
        Ok(state.projects.values().filter(|p| p.owner_id == user_id).count() as i64)
    }
}

#[async_trait]
impl GroupRepository for MemoryStore {
    async fn find_group(&self, group_id: Uuid) -> AppResult<Option<Group>> {
        Ok(self.state.read().await.groups.get(&group_id).cloned())
    }

    async fn list_groups_by_project(&self, project_id: Uuid) -> AppResult<Vec<Group>> {
        let state = self.state.read().await;
        let mut groups: Vec<Group> = state
            .groups
            .values()
            .filter(|g| g.project_id == project_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn insert_group(&self, group: &Group) -> AppResult<()> {
        self.state.write().await.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn delete_group(&self, group_id: Uuid) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.groups.remove(&group_id);
        state.group_members.retain(|(gid, _)| *gid != group_id);
        Ok(())
    }

    async fn add_group_member(&self, member: &GroupMember) -> AppResult<()> {
        self.state.write().await.group_members.insert((member.group_id, member.user_id));
        Ok(())
    }

    async fn remove_group_member(&self, group_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        Ok(self.state.write().await.group_members.remove(&(group_id, user_id)))
    }

    async fn list_group_members(&self, group_id: Uuid) -> AppResult<Vec<GroupMember>> {
        let state = self.state.read().await;
        Ok(state
            .group_members
            .iter()
            .filter(|(gid, _)| *gid == group_id)
            .map(|(group_id, user_id)| GroupMember { group_id: *group_id, user_id: *user_id })
            .collect())
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn find_task(&self, task_id: Uuid) -> AppResult<Option<Task>> {
        Ok(self.state.read().await.tasks.get(&task_id).cloned())
    }

    async fn list_tasks_by_project(&self, project_id: Uuid) -> AppResult<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn insert_task(&self, task: &Task) -> AppResult<()> {
        self.state.write().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> AppResult<()> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(AppError::not_found("task not found")),
        }
    }

    async fn delete_task(&self, task_id: Uuid) -> AppResult<()> {
        self.state.write().await.tasks.remove(&task_id);
        Ok(())
    }

    async fn count_dependents(&self, parent: DependentsOf) -> AppResult<u64> {
        let state = self.state.read().await;
        let count = match parent {
            DependentsOf::Group(group_id) => state.tasks.values().filter(|t| t.group_id == Some(group_id)).count(),
            DependentsOf::Project(project_id) => state.tasks.values().filter(|t| t.project_id == project_id).count(),
        };
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::membership::{MembershipScope, ProjectRole};

    #[tokio::test]
    async fn upsert_keeps_one_row_per_user_and_project() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let project = Uuid::new_v4();

        let first = ProjectMembership::new(user, project, ProjectRole::ProjectMember, MembershipScope::All);
        store.upsert_membership(&first).await.unwrap();
        let second = ProjectMembership::new(user, project, ProjectRole::Admin, MembershipScope::All);
        store.upsert_membership(&second).await.unwrap();

        let rows = store.list_memberships_by_project(project).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, ProjectRole::Admin);
        assert_eq!(rows[0].created_at, first.created_at);
    }

    #[tokio::test]
    async fn delete_project_drops_memberships() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let project = Project::new(owner, "p", None);
        store.insert_project(&project).await.unwrap();
        store
            .upsert_membership(&ProjectMembership::new(owner, project.id, ProjectRole::ProjectOwner, MembershipScope::All))
            .await
            .unwrap();

        store.delete_project(project.id).await.unwrap();

        assert!(store.find_membership(owner, project.id).await.unwrap().is_none());
        assert_eq!(store.count_owned_projects(owner).await.unwrap(), 0);
    }
}
