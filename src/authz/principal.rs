use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

/// Global role carried by the caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalRole {
    SuperAdmin,
    Admin,
    User,
}

impl GlobalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalRole::SuperAdmin => "SUPER_ADMIN",
            GlobalRole::Admin => "ADMIN",
            GlobalRole::User => "USER",
        }
    }
}

impl fmt::Display for GlobalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlobalRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUPER_ADMIN" => Ok(GlobalRole::SuperAdmin),
            "ADMIN" => Ok(GlobalRole::Admin),
            "USER" => Ok(GlobalRole::User),
            other => Err(AppError::bad_request(format!("unknown global role: {other}"))),
        }
    }
}

/// The authenticated caller. Immutable for the duration of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub global_role: GlobalRole,
}

impl Principal {
    pub fn new(id: Uuid, global_role: GlobalRole) -> Self {
        Self { id, global_role }
    }

    pub fn user(id: Uuid) -> Self {
        Self::new(id, GlobalRole::User)
    }

    pub fn super_admin(id: Uuid) -> Self {
        Self::new(id, GlobalRole::SuperAdmin)
    }

    pub fn is_super_admin(&self) -> bool {
        self.global_role == GlobalRole::SuperAdmin
    }
}
