use std::sync::Arc;

use super::principal::Principal;
use crate::errors::{AppError, AppResult};
use crate::store::MembershipRepository;

/// Maximum number of projects a non-super-admin principal may own.
pub const PROJECT_QUOTA: i64 = 3;

/// Project-ownership quota.
///
/// The owned count is always read live from the store and includes
/// completed and archived projects: the quota limits creation capacity,
/// not active workload.
#[derive(Clone)]
pub struct QuotaEnforcer {
    memberships: Arc<dyn MembershipRepository>,
    limit: i64,
}

impl QuotaEnforcer {
    pub fn new(memberships: Arc<dyn MembershipRepository>) -> Self {
        Self {
            memberships,
            limit: PROJECT_QUOTA,
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub async fn owned_project_count(&self, principal: &Principal) -> AppResult<i64> {
        self.memberships.count_owned_projects(principal.id).await
    }

    pub async fn can_create_project(&self, principal: &Principal) -> AppResult<bool> {
        if principal.is_super_admin() {
            return Ok(true);
        }
        Ok(self.owned_project_count(principal).await? < self.limit)
    }

    /// `QuotaExceeded` with the current count when the principal is at the limit.
    pub async fn ensure_can_create(&self, principal: &Principal) -> AppResult<()> {
        if principal.is_super_admin() {
            return Ok(());
        }

        let owned_count = self.owned_project_count(principal).await?;
        if owned_count >= self.limit {
            tracing::info!(user_id = %principal.id, owned_count, limit = self.limit, "project quota reached");
            return Err(AppError::QuotaExceeded {
                owned_count,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Hook for callers that cache the counter. The live count stays canonical.
    pub fn record_project_created(&self, principal: &Principal) {
        tracing::debug!(user_id = %principal.id, "project created against quota");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::{Project, ProjectStatus};
    use crate::store::{MemoryStore, ProjectRepository};
    use uuid::Uuid;

    async fn owning(store: &MemoryStore, owner: Uuid, statuses: &[ProjectStatus]) {
        for status in statuses {
            let mut project = Project::new(owner, "p", None);
            project.status = *status;
            store.insert_project(&project).await.unwrap();
        }
    }

    #[tokio::test]
    async fn two_owned_allows_three_owned_blocks() {
        let store = Arc::new(MemoryStore::new());
        let quota = QuotaEnforcer::new(store.clone());
        let user = Principal::user(Uuid::new_v4());

        owning(&store, user.id, &[ProjectStatus::Active, ProjectStatus::Active]).await;
        assert!(quota.can_create_project(&user).await.unwrap());

        owning(&store, user.id, &[ProjectStatus::Active]).await;
        assert!(!quota.can_create_project(&user).await.unwrap());
        assert_eq!(quota.owned_project_count(&user).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn archived_and_completed_projects_count() {
        let store = Arc::new(MemoryStore::new());
        let quota = QuotaEnforcer::new(store.clone());
        let user = Principal::user(Uuid::new_v4());

        owning(&store, user.id, &[ProjectStatus::Archived, ProjectStatus::Completed, ProjectStatus::Active]).await;

        assert!(!quota.can_create_project(&user).await.unwrap());
        let err = quota.ensure_can_create(&user).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { owned_count: 3, limit: 3 }));
    }

    #[tokio::test]
    async fn super_admin_is_exempt() {
        let store = Arc::new(MemoryStore::new());
        let quota = QuotaEnforcer::new(store.clone());
        let admin = Principal::super_admin(Uuid::new_v4());

        owning(&store, admin.id, &[ProjectStatus::Active; 5]).await;

        assert!(quota.can_create_project(&admin).await.unwrap());
        assert!(quota.ensure_can_create(&admin).await.is_ok());
    }
}
