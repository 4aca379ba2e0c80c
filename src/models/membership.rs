use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

/// Role a user holds inside one project.
///
/// Variants are declared in ascending order of privilege so that
/// `role >= ProjectRole::ProjectOwner` reads as "at least owner".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectRole {
    ProjectMember,
    ProjectOwner,
    Admin,
    SuperAdmin,
}

impl ProjectRole {
    pub fn satisfies(self, required: ProjectRole) -> bool {
        self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectRole::ProjectMember => "PROJECT_MEMBER",
            ProjectRole::ProjectOwner => "PROJECT_OWNER",
            ProjectRole::Admin => "ADMIN",
            ProjectRole::SuperAdmin => "SUPER_ADMIN",
        }
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROJECT_MEMBER" => Ok(ProjectRole::ProjectMember),
            "PROJECT_OWNER" => Ok(ProjectRole::ProjectOwner),
            "ADMIN" => Ok(ProjectRole::Admin),
            "SUPER_ADMIN" => Ok(ProjectRole::SuperAdmin),
            other => Err(AppError::bad_request(format!("unknown project role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeKind {
    All,
    SpecificGroups,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::All => "ALL",
            ScopeKind::SpecificGroups => "SPECIFIC_GROUPS",
        }
    }
}

impl FromStr for ScopeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(ScopeKind::All),
            "SPECIFIC_GROUPS" => Ok(ScopeKind::SpecificGroups),
            other => Err(AppError::bad_request(format!("unknown membership scope: {other}"))),
        }
    }
}

/// Group visibility granted by a membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipScope {
    All,
    SpecificGroups(BTreeSet<Uuid>),
}

impl MembershipScope {
    /// Builds a scope from its stored parts. The group list is only consulted
    /// for `SPECIFIC_GROUPS`.
    pub fn from_parts(kind: ScopeKind, visible_group_ids: impl IntoIterator<Item = Uuid>) -> Self {
        match kind {
            ScopeKind::All => MembershipScope::All,
            ScopeKind::SpecificGroups => MembershipScope::SpecificGroups(visible_group_ids.into_iter().collect()),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match self {
            MembershipScope::All => ScopeKind::All,
            MembershipScope::SpecificGroups(_) => ScopeKind::SpecificGroups,
        }
    }

    pub fn visible_group_ids(&self) -> Vec<Uuid> {
        match self {
            MembershipScope::All => Vec::new(),
            MembershipScope::SpecificGroups(ids) => ids.iter().copied().collect(),
        }
    }

    pub fn allows_group(&self, group_id: Uuid) -> bool {
        match self {
            MembershipScope::All => true,
            MembershipScope::SpecificGroups(ids) => ids.contains(&group_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMembership {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub role: ProjectRole,
    pub scope: MembershipScope,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectMembership {
    pub fn new(user_id: Uuid, project_id: Uuid, role: ProjectRole, scope: MembershipScope) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            project_id,
            role,
            scope,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Loggable for ProjectMembership {
    fn entity_type() -> &'static str { "membership" }
    fn subject_id(&self) -> Uuid { self.project_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// Wire shape of a membership: scope flattened into a kind plus id list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MembershipView {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub role: ProjectRole,
    pub scope: ScopeKind,
    pub visible_group_ids: Vec<Uuid>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProjectMembership> for MembershipView {
    fn from(m: ProjectMembership) -> Self {
        MembershipView {
            user_id: m.user_id,
            project_id: m.project_id,
            role: m.role,
            scope: m.scope.kind(),
            visible_group_ids: m.scope.visible_group_ids(),
            active: m.active,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MembershipUpsertRequest {
    pub user_id: Uuid,
    #[schema(example = "PROJECT_MEMBER")]
    pub role: ProjectRole,
    #[schema(example = "SPECIFIC_GROUPS")]
    pub scope: ScopeKind,
    #[serde(default)]
    pub visible_group_ids: Vec<Uuid>,
    pub active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_order_is_member_owner_admin_super() {
        assert!(ProjectRole::SuperAdmin > ProjectRole::Admin);
        assert!(ProjectRole::Admin > ProjectRole::ProjectOwner);
        assert!(ProjectRole::ProjectOwner > ProjectRole::ProjectMember);
        assert!(ProjectRole::Admin.satisfies(ProjectRole::ProjectOwner));
        assert!(!ProjectRole::ProjectMember.satisfies(ProjectRole::ProjectOwner));
    }

    #[test]
    fn specific_scope_only_allows_listed_groups() {
        let g5 = Uuid::new_v4();
        let g6 = Uuid::new_v4();
        let scope = MembershipScope::from_parts(ScopeKind::SpecificGroups, [g5]);
        assert!(scope.allows_group(g5));
        assert!(!scope.allows_group(g6));
        assert!(MembershipScope::All.allows_group(g6));
    }

    #[test]
    fn all_scope_ignores_stored_group_ids() {
        let scope = MembershipScope::from_parts(ScopeKind::All, [Uuid::new_v4()]);
        assert_eq!(scope, MembershipScope::All);
        assert!(scope.visible_group_ids().is_empty());
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("project_owner".parse::<ProjectRole>().unwrap(), ProjectRole::ProjectOwner);
        assert!("OWNER".parse::<ProjectRole>().is_err());
    }
}
