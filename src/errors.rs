use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

/// Children still attached to an entity that is about to be deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Dependents {
    pub groups: u64,
    pub tasks: u64,
    pub members: u64,
}

impl Dependents {
    pub fn is_empty(&self) -> bool {
        self.groups == 0 && self.tasks == 0 && self.members == 0
    }
}

impl std::fmt::Display for Dependents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} groups, {} tasks, {} members", self.groups, self.tasks, self.members)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {action} requires {required}")]
    Forbidden {
        action: &'static str,
        required: &'static str,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("group {group_id} does not belong to project {project_id}")]
    InvalidGroup { group_id: Uuid, project_id: Uuid },
    #[error("invalid status: {0}")]
    InvalidStatus(String),
    #[error("project quota exceeded: {owned_count} of {limit} projects owned")]
    QuotaExceeded { owned_count: i64, limit: i64 },
    #[error("{entity} {id} has dependents ({dependents})")]
    HasDependents {
        entity: &'static str,
        id: Uuid,
        dependents: Dependents,
    },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(action: &'static str, required: &'static str) -> Self {
        Self::Forbidden { action, required }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) | AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidGroup { .. } | AppError::InvalidStatus(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::QuotaExceeded { .. } | AppError::HasDependents { .. } => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden { .. } => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidGroup { .. } => "invalid_group",
            AppError::InvalidStatus(_) => "invalid_status",
            AppError::QuotaExceeded { .. } => "quota_exceeded",
            AppError::HasDependents { .. } => "has_dependents",
            AppError::BadRequest(_) => "bad_request",
            AppError::Configuration(_) => "configuration",
            AppError::Token(_) => "token",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        }
    }

    /// Structured fields the client needs to build an actionable message.
    fn details(&self) -> Option<Value> {
        match self {
            AppError::Forbidden { action, required } => Some(json!({ "action": action, "required": required })),
            AppError::InvalidGroup { group_id, project_id } => {
                Some(json!({ "group_id": group_id, "project_id": project_id }))
            }
            AppError::InvalidStatus(value) => Some(json!({
                "value": value,
                "allowed": ["TODO", "IN_PROGRESS", "REVIEW", "DONE"],
            })),
            AppError::QuotaExceeded { owned_count, limit } => {
                Some(json!({ "owned_count": owned_count, "limit": limit }))
            }
            AppError::HasDependents { entity, id, dependents } => Some(json!({
                "entity": entity,
                "id": id,
                "dependents": dependents,
            })),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "request failed");
        }

        let payload = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        };

        (status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_carries_count_and_limit() {
        let err = AppError::QuotaExceeded { owned_count: 3, limit: 3 };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        let details = err.details().unwrap();
        assert_eq!(details["owned_count"], 3);
        assert_eq!(details["limit"], 3);
    }

    #[test]
    fn forbidden_names_required_role() {
        let err = AppError::forbidden("task.update_fields", "creator or project owner");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(err.to_string().contains("creator or project owner"));
    }

    #[test]
    fn dependents_display_lists_counts() {
        let deps = Dependents { groups: 0, tasks: 1, members: 2 };
        assert!(!deps.is_empty());
        assert_eq!(deps.to_string(), "0 groups, 1 tasks, 2 members");
    }
}
