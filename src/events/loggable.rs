use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Retention class of an audit record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Never trimmed (deletions, grants, project lifecycle).
    Critical,
    #[default]
    Important,
    /// Safe to trim aggressively.
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Entities that can appear as the subject of an audit record.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of event names, e.g. `task` in `task.created`.
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> Uuid;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" => Severity::Critical,
            _ => self.severity(),
        }
    }

    /// Snapshot stored as before/after state.
    fn audit_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
