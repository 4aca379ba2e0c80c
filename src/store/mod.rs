//! Repository interfaces consumed by the authorization engine and workflow.
//!
//! Two implementations ship with the crate:
//! - [`memory::MemoryStore`] for tests and embedding
//! - [`sqlite::SqliteStore`] backed by `sqlx`

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::group::{Group, GroupMember};
use crate::models::membership::ProjectMembership;
use crate::models::project::Project;
use crate::models::task::Task;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_project(&self, project_id: Uuid) -> AppResult<Option<Project>>;
    async fn list_projects(&self) -> AppResult<Vec<Project>>;
    async fn insert_project(&self, project: &Project) -> AppResult<()>;
    async fn update_project(&self, project: &Project) -> AppResult<()>;
    /// Removes the project together with its memberships.
    async fn delete_project(&self, project_id: Uuid) -> AppResult<()>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn find_membership(&self, user_id: Uuid, project_id: Uuid) -> AppResult<Option<ProjectMembership>>;
    async fn list_memberships_by_user(&self, user_id: Uuid) -> AppResult<Vec<ProjectMembership>>;
    async fn list_memberships_by_project(&self, project_id: Uuid) -> AppResult<Vec<ProjectMembership>>;
    /// Inserts or replaces the row keyed by `(user_id, project_id)`.
    async fn upsert_membership(&self, membership: &ProjectMembership) -> AppResult<()>;
    /// Projects owned by `user_id`, all statuses included.
    async fn count_owned_projects(&self, user_id: Uuid) -> AppResult<i64>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn find_group(&self, group_id: Uuid) -> AppResult<Option<Group>>;
    async fn list_groups_by_project(&self, project_id: Uuid) -> AppResult<Vec<Group>>;
    async fn insert_group(&self, group: &Group) -> AppResult<()>;
    async fn delete_group(&self, group_id: Uuid) -> AppResult<()>;
    async fn add_group_member(&self, member: &GroupMember) -> AppResult<()>;
    async fn remove_group_member(&self, group_id: Uuid, user_id: Uuid) -> AppResult<bool>;
    async fn list_group_members(&self, group_id: Uuid) -> AppResult<Vec<GroupMember>>;
}

/// Parent whose children are counted before a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependentsOf {
    Group(Uuid),
    Project(Uuid),
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_task(&self, task_id: Uuid) -> AppResult<Option<Task>>;
    async fn list_tasks_by_project(&self, project_id: Uuid) -> AppResult<Vec<Task>>;
    async fn insert_task(&self, task: &Task) -> AppResult<()>;
    async fn update_task(&self, task: &Task) -> AppResult<()>;
    async fn delete_task(&self, task_id: Uuid) -> AppResult<()>;
    /// Number of tasks attached to the parent.
    async fn count_dependents(&self, parent: DependentsOf) -> AppResult<u64>;
}

/// Handles to every repository, usually all backed by the same store.
#[derive(Clone)]
pub struct Repositories {
    pub projects: Arc<dyn ProjectRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub tasks: Arc<dyn TaskRepository>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ProjectRepository + MembershipRepository + GroupRepository + TaskRepository + 'static,
    {
        Self {
            projects: store.clone(),
            memberships: store.clone(),
            groups: store.clone(),
            tasks: store,
        }
    }
}
