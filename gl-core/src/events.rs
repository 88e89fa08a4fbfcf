use crate::types::{Operation, OperationId, OperationStatus};
use serde::{Deserialize, Serialize};

/// Push event delivered to session observers.
///
/// Serializes to the fixed wire shape `{"type": ..., "data": {...}}`:
/// `pending` carries the full record so a reviewer can render the proposal,
/// `status` carries just the transition (plus the reason on rejection), and
/// `result` carries the terminal outcome of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OperationEvent {
    Pending(Operation),
    Status {
        operation_id: OperationId,
        status: OperationStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rejection_reason: Option<String>,
    },
    Result {
        operation_id: OperationId,
        status: OperationStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OperationEvent {
    pub(crate) fn pending(op: &Operation) -> Self {
        Self::Pending(op.clone())
    }

    pub(crate) fn status(op: &Operation) -> Self {
        Self::Status {
            operation_id: op.operation_id.clone(),
            status: op.status,
            rejection_reason: op.rejection_reason.clone(),
        }
    }

    pub(crate) fn result(op: &Operation) -> Self {
        Self::Result {
            operation_id: op.operation_id.clone(),
            status: op.status,
            result: op.result.clone(),
            error: op.error.clone(),
        }
    }

    pub fn operation_id(&self) -> &OperationId {
        match self {
            Self::Pending(op) => &op.operation_id,
            Self::Status { operation_id, .. } => operation_id,
            Self::Result { operation_id, .. } => operation_id,
        }
    }
}
