use crate::error::{CoordinatorError, Result};
use crate::store::OperationStore;
use crate::types::{OperationId, OperationStatus};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Collaborator that actually performs an operation.
///
/// The executor knows nothing about kinds; it hands over the frozen
/// `(kind, parameters)` pair and records whatever comes back.
#[async_trait]
pub trait MutationRunner: Send + Sync {
    async fn run(
        &self,
        kind: &str,
        parameters: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Outcome of one execution attempt, as reported to the caller. The same
/// data lands on the record itself and in the session's `result` event.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionReport {
    fn succeeded(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Runs approved operations exactly once.
pub struct OperationExecutor {
    store: Arc<OperationStore>,
    runner: Arc<dyn MutationRunner>,
}

impl OperationExecutor {
    pub fn new(store: Arc<OperationStore>, runner: Arc<dyn MutationRunner>) -> Self {
        Self { store, runner }
    }

    /// Executes one approved operation.
    ///
    /// The record must be exactly `approved`; the `approved -> executing`
    /// transition is the at-most-once lock, so of two concurrent calls only
    /// one reaches the runner. The failure of the runner is an outcome, not
    /// an error: it lands on the record and in the returned report.
    #[tracing::instrument(level = "info", skip_all, fields(operation_id = %id))]
    pub async fn execute(&self, id: &OperationId) -> Result<ExecutionReport> {
        let op = self
            .store
            .get(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))?;
        if op.status != OperationStatus::Approved {
            return Err(CoordinatorError::InvalidState(op.status));
        }
        if !self.store.mark_executing(id) {
            // Lost the guarded transition to a concurrent caller or sweeper.
            let status = self
                .store
                .get(id)
                .map(|op| op.status)
                .unwrap_or(OperationStatus::Expired);
            return Err(CoordinatorError::InvalidState(status));
        }

        match self.runner.run(&op.kind, &op.parameters).await {
            Ok(result) => {
                if !self.store.complete(id, result.clone()) {
                    tracing::error!(operation_id = %id, "completed operation was no longer executing");
                }
                tracing::info!(kind = %op.kind, "operation executed");
                Ok(ExecutionReport::succeeded(result))
            }
            Err(e) => {
                let message = e.to_string();
                if !self.store.fail(id, message.clone()) {
                    tracing::error!(operation_id = %id, "failed operation was no longer executing");
                }
                tracing::warn!(kind = %op.kind, error = %message, "operation execution failed");
                Ok(ExecutionReport::failed(message))
            }
        }
    }

    /// Executes a batch sequentially; each id gets its own report and a
    /// rejected or unknown id never blocks the rest.
    pub async fn execute_batch(
        &self,
        ids: &[OperationId],
    ) -> HashMap<OperationId, ExecutionReport> {
        let mut reports = HashMap::with_capacity(ids.len());
        for id in ids {
            let report = match self.execute(id).await {
                Ok(report) => report,
                Err(e) => ExecutionReport::failed(e.to_string()),
            };
            reports.insert(id.clone(), report);
        }
        reports
    }
}
