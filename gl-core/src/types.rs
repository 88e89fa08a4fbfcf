use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(OperationId);
id_newtype!(SessionId);

/// Lifecycle states of a proposed operation.
///
/// `Pending` is the only state a reviewer can act on; `Rejected`, `Expired`,
/// `Completed`, and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    Expired,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Expired | Self::Completed | Self::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Before/after content snapshot captured when an operation is proposed.
///
/// `old_content` is absent when the target does not exist yet (fresh write);
/// `new_content` is absent for a delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffPreview {
    pub file_path: String,
    #[serde(default)]
    pub old_content: Option<String>,
    #[serde(default)]
    pub new_content: Option<String>,
}

/// A proposed, reviewer-gated mutation.
///
/// `kind`, `parameters`, and `preview` are frozen at creation so the executor
/// acts on exactly what the reviewer saw. Only `status`, `result`, `error`,
/// and `rejection_reason` change afterwards, and only through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: OperationId,
    pub session_id: SessionId,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub preview: Option<DiffPreview>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

/// Creation payload for [`crate::OperationStore::add`]. The store assigns the
/// operation id and timestamps.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub session_id: SessionId,
    pub kind: String,
    pub parameters: serde_json::Value,
    pub preview: Option<DiffPreview>,
    /// Overrides the store's configured approval timeout for this record.
    pub timeout: Option<Duration>,
}

impl NewOperation {
    pub fn new(
        session_id: impl Into<SessionId>,
        kind: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind: kind.into(),
            parameters,
            preview: None,
            timeout: None,
        }
    }

    pub fn with_preview(mut self, preview: DiffPreview) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_cover_exactly_the_dead_ends() {
        for status in [
            OperationStatus::Rejected,
            OperationStatus::Expired,
            OperationStatus::Completed,
            OperationStatus::Failed,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
        for status in [
            OperationStatus::Pending,
            OperationStatus::Approved,
            OperationStatus::Executing,
        ] {
            assert!(!status.is_terminal(), "{status} should not be terminal");
        }
    }

    #[test]
    fn status_serializes_lowercase() {
        let v = serde_json::to_value(OperationStatus::Executing).unwrap();
        assert_eq!(v, serde_json::json!("executing"));
        let back: OperationStatus = serde_json::from_value(v).unwrap();
        assert_eq!(back, OperationStatus::Executing);
    }

    #[test]
    fn new_operation_builder_sets_overrides() {
        let op = NewOperation::new("s1", "edit", serde_json::json!({ "path": "a.txt" }))
            .with_timeout(Duration::seconds(5))
            .with_preview(DiffPreview {
                file_path: "a.txt".to_string(),
                old_content: Some("a".to_string()),
                new_content: Some("b".to_string()),
            });
        assert_eq!(op.session_id.as_str(), "s1");
        assert_eq!(op.timeout, Some(Duration::seconds(5)));
        assert_eq!(op.preview.unwrap().file_path, "a.txt");
    }
}
