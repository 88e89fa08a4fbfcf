use crate::error::{CoordinatorError, Result};
use crate::events::OperationEvent;
use crate::hub::NotificationHub;
use crate::types::{NewOperation, Operation, OperationId, OperationStatus, SessionId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a record may sit in `pending` before it expires.
    pub approval_timeout: Duration,
    /// How long resolved records are kept for recent-activity listings.
    pub retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            approval_timeout: Duration::seconds(1800),
            retention: Duration::seconds(3600),
        }
    }
}

/// Single source of truth for operation records.
///
/// Every transition is a check-then-set performed inside the record's map
/// entry lock, so concurrent reviewers, the executor, and the sweeper race
/// safely per record without a store-wide lock. Events are published inside
/// that same guarded step, which is what keeps per-operation event order
/// identical to commit order.
pub struct OperationStore {
    cfg: StoreConfig,
    hub: Arc<NotificationHub>,
    ops: DashMap<OperationId, Operation>,
}

impl OperationStore {
    pub fn new(cfg: StoreConfig, hub: Arc<NotificationHub>) -> Self {
        Self {
            cfg,
            hub,
            ops: DashMap::new(),
        }
    }

    /// Queues a new record in `pending` and notifies the session's observers.
    pub fn add(&self, new_op: NewOperation) -> Result<Operation> {
        let created_at = Utc::now();
        let timeout = new_op.timeout.unwrap_or(self.cfg.approval_timeout);
        let op = Operation {
            operation_id: OperationId::new(Uuid::new_v4().to_string()),
            session_id: new_op.session_id,
            kind: new_op.kind,
            parameters: new_op.parameters,
            status: OperationStatus::Pending,
            created_at,
            expires_at: created_at + timeout,
            preview: new_op.preview,
            result: None,
            error: None,
            rejection_reason: None,
        };
        self.insert_new(op)
    }

    /// The record must be freshly built and `pending`. Publishing happens
    /// under the entry lock so no transition event can precede `pending`.
    fn insert_new(&self, op: Operation) -> Result<Operation> {
        match self.ops.entry(op.operation_id.clone()) {
            Entry::Occupied(_) => Err(CoordinatorError::DuplicateId(op.operation_id.to_string())),
            Entry::Vacant(entry) => {
                let guard = entry.insert(op.clone());
                self.hub
                    .publish(&op.session_id, OperationEvent::pending(&op));
                drop(guard);
                tracing::debug!(
                    operation_id = %op.operation_id,
                    session_id = %op.session_id,
                    kind = %op.kind,
                    expires_at = %op.expires_at,
                    "operation queued"
                );
                Ok(op)
            }
        }
    }

    pub fn get(&self, id: &OperationId) -> Option<Operation> {
        self.ops.get(id).map(|entry| entry.value().clone())
    }

    /// All `pending` records for the session, oldest first (older proposals
    /// should be resolved first to avoid drift against a changing file).
    /// Records past their deadline are demoted on the way, not returned.
    pub fn list_pending(&self, session_id: &SessionId) -> Vec<Operation> {
        let now = Utc::now();
        let mut stale = Vec::new();
        let mut pending = Vec::new();
        for entry in self.ops.iter() {
            let op = entry.value();
            if op.session_id != *session_id || op.status != OperationStatus::Pending {
                continue;
            }
            if op.expires_at <= now {
                stale.push(op.operation_id.clone());
            } else {
                pending.push(op.clone());
            }
        }
        for id in &stale {
            self.transition(id, OperationStatus::Pending, OperationStatus::Expired, |_| {});
        }
        pending.sort_by_key(|op| op.created_at);
        pending
    }

    /// Every retained record for the session, newest first.
    pub fn list_recent(&self, session_id: &SessionId) -> Vec<Operation> {
        let mut out: Vec<Operation> = self
            .ops
            .iter()
            .filter(|entry| entry.value().session_id == *session_id)
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by_key(|op| op.created_at);
        out.reverse();
        out
    }

    /// `pending -> approved`. Returns false when the record is unknown, has
    /// already left `pending`, or sat past its deadline (in which case this
    /// call demotes it to `expired` instead).
    pub fn approve(&self, id: &OperationId) -> bool {
        self.resolve_pending(id, Utc::now(), OperationStatus::Approved, |_| {})
    }

    /// `pending -> rejected`, recording the reviewer's reason.
    pub fn reject(&self, id: &OperationId, reason: Option<String>) -> bool {
        self.resolve_pending(id, Utc::now(), OperationStatus::Rejected, |op| {
            op.rejection_reason = reason;
        })
    }

    /// Applies `approve` to each id independently; one stale or unknown id
    /// never blocks the rest.
    pub fn batch_approve(&self, ids: &[OperationId]) -> HashMap<OperationId, bool> {
        ids.iter().map(|id| (id.clone(), self.approve(id))).collect()
    }

    pub fn batch_reject(
        &self,
        ids: &[OperationId],
        reason: Option<String>,
    ) -> HashMap<OperationId, bool> {
        ids.iter()
            .map(|id| (id.clone(), self.reject(id, reason.clone())))
            .collect()
    }

    /// `approved -> executing`. Executor-only; winning this transition is
    /// what grants the exclusive right to run the record.
    pub fn mark_executing(&self, id: &OperationId) -> bool {
        self.transition(
            id,
            OperationStatus::Approved,
            OperationStatus::Executing,
            |_| {},
        )
    }

    /// `executing -> completed`, recording the collaborator's result.
    pub fn complete(&self, id: &OperationId, result: serde_json::Value) -> bool {
        self.transition(
            id,
            OperationStatus::Executing,
            OperationStatus::Completed,
            |op| {
                op.result = Some(result);
            },
        )
    }

    /// `executing -> failed`, recording the collaborator's error as data.
    pub fn fail(&self, id: &OperationId, error: impl Into<String>) -> bool {
        let error = error.into();
        self.transition(
            id,
            OperationStatus::Executing,
            OperationStatus::Failed,
            |op| {
                op.error = Some(error);
            },
        )
    }

    /// Demotes every `pending` record whose deadline has passed. Returns how
    /// many records this call transitioned; concurrent reviewer actions on
    /// the same records simply win or lose the per-record guard.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let stale: Vec<OperationId> = self
            .ops
            .iter()
            .filter(|entry| {
                entry.value().status == OperationStatus::Pending
                    && entry.value().expires_at <= now
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut swept = 0;
        for id in &stale {
            if self.transition(id, OperationStatus::Pending, OperationStatus::Expired, |_| {}) {
                swept += 1;
            }
        }
        if swept > 0 {
            tracing::debug!(swept, "expired stale pending operations");
        }
        swept
    }

    /// Physically removes terminal records older than the retention window.
    /// Live records (`pending`, `approved`, `executing`) are never evicted.
    pub fn evict_resolved(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.cfg.retention;
        let resolved: Vec<OperationId> = self
            .ops
            .iter()
            .filter(|entry| {
                entry.value().status.is_terminal() && entry.value().created_at <= cutoff
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in &resolved {
            if self
                .ops
                .remove_if(id, |_, op| op.status.is_terminal())
                .is_some()
            {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, "evicted resolved operations");
        }
        evicted
    }

    pub fn pending_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|entry| entry.value().status == OperationStatus::Pending)
            .count()
    }

    /// Guarded `pending -> {approved,rejected}` with lazy expiry: a record
    /// past its deadline is demoted here instead, and the caller gets false.
    fn resolve_pending(
        &self,
        id: &OperationId,
        now: DateTime<Utc>,
        to: OperationStatus,
        mutate: impl FnOnce(&mut Operation),
    ) -> bool {
        let Some(mut entry) = self.ops.get_mut(id) else {
            return false;
        };
        let op = entry.value_mut();
        if op.status != OperationStatus::Pending {
            return false;
        }
        if op.expires_at <= now {
            op.status = OperationStatus::Expired;
            self.hub.publish(&op.session_id, OperationEvent::status(op));
            tracing::debug!(operation_id = %id, "operation expired on access");
            return false;
        }
        op.status = to;
        mutate(op);
        self.hub.publish(&op.session_id, OperationEvent::status(op));
        tracing::debug!(operation_id = %id, to = %to, "operation resolved");
        true
    }

    /// Single-record compare-and-set. The status check, the write, and the
    /// publish all happen under the record's entry lock; completion and
    /// failure emit `result`, everything else emits `status`.
    fn transition(
        &self,
        id: &OperationId,
        from: OperationStatus,
        to: OperationStatus,
        mutate: impl FnOnce(&mut Operation),
    ) -> bool {
        let Some(mut entry) = self.ops.get_mut(id) else {
            return false;
        };
        let op = entry.value_mut();
        if op.status != from {
            return false;
        }
        op.status = to;
        mutate(op);
        let event = match to {
            OperationStatus::Completed | OperationStatus::Failed => OperationEvent::result(op),
            _ => OperationEvent::status(op),
        };
        self.hub.publish(&op.session_id, event);
        tracing::debug!(operation_id = %id, from = %from, to = %to, "operation transition");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn test_store() -> (Arc<OperationStore>, Arc<NotificationHub>) {
        let hub = Arc::new(NotificationHub::new(16));
        let store = Arc::new(OperationStore::new(StoreConfig::default(), hub.clone()));
        (store, hub)
    }

    fn sample(session: &str) -> NewOperation {
        NewOperation::new(
            session,
            "edit",
            serde_json::json!({ "path": "notes.txt", "old_string": "a", "new_string": "b" }),
        )
    }

    #[test]
    fn add_creates_pending_record_with_deadline() {
        let (store, _hub) = test_store();
        let op = store.add(sample("s1")).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.expires_at, op.created_at + Duration::seconds(1800));
        assert_eq!(store.get(&op.operation_id).unwrap().kind, "edit");
    }

    #[test]
    fn add_honors_per_operation_timeout_override() {
        let (store, _hub) = test_store();
        let op = store
            .add(sample("s1").with_timeout(Duration::seconds(5)))
            .unwrap();
        assert_eq!(op.expires_at, op.created_at + Duration::seconds(5));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let (store, _hub) = test_store();
        let op = store.add(sample("s1")).unwrap();
        let err = store.insert_new(op.clone()).unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateId(_)));
    }

    #[test]
    fn approve_moves_record_out_of_pending_list() {
        let (store, _hub) = test_store();
        let op = store.add(sample("s1")).unwrap();
        assert_eq!(store.list_pending(&op.session_id).len(), 1);

        assert!(store.approve(&op.operation_id));
        assert_eq!(store.get(&op.operation_id).unwrap().status, OperationStatus::Approved);
        assert!(store.list_pending(&op.session_id).is_empty());
    }

    #[test]
    fn second_resolution_loses() {
        let (store, _hub) = test_store();
        let op = store.add(sample("s1")).unwrap();
        assert!(store.approve(&op.operation_id));
        assert!(!store.reject(&op.operation_id, Some("late".to_string())));
        assert_eq!(store.get(&op.operation_id).unwrap().status, OperationStatus::Approved);
    }

    #[test]
    fn reject_records_reason() {
        let (store, _hub) = test_store();
        let op = store.add(sample("s1")).unwrap();
        assert!(store.reject(&op.operation_id, Some("touches prod config".to_string())));
        let record = store.get(&op.operation_id).unwrap();
        assert_eq!(record.status, OperationStatus::Rejected);
        assert_eq!(record.rejection_reason.as_deref(), Some("touches prod config"));
    }

    #[test]
    fn concurrent_resolutions_have_exactly_one_winner() {
        let (store, _hub) = test_store();
        let op = store.add(sample("s1")).unwrap();
        let id = op.operation_id.clone();
        let far_future = Utc::now() + Duration::days(30);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let id = id.clone();
            handles.push(thread::spawn(move || u32::from(store.approve(&id))));
        }
        for _ in 0..4 {
            let store = store.clone();
            let id = id.clone();
            handles.push(thread::spawn(move || {
                u32::from(store.reject(&id, Some("no".to_string())))
            }));
        }
        for _ in 0..2 {
            let store = store.clone();
            handles.push(thread::spawn(move || store.sweep_expired(far_future) as u32));
        }

        let wins: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, 1);

        let final_status = store.get(&id).unwrap().status;
        assert!(
            matches!(
                final_status,
                OperationStatus::Approved | OperationStatus::Rejected | OperationStatus::Expired
            ),
            "unexpected final status {final_status}"
        );
    }

    #[test]
    fn batch_approve_reports_per_id_outcomes() {
        let (store, _hub) = test_store();
        let valid = store.add(sample("s1")).unwrap();
        let stale = store
            .add(sample("s1").with_timeout(Duration::zero()))
            .unwrap();
        let unknown = OperationId::new("missing");

        let ids = vec![
            valid.operation_id.clone(),
            stale.operation_id.clone(),
            unknown.clone(),
        ];
        let results = store.batch_approve(&ids);

        assert!(results[&valid.operation_id]);
        assert!(!results[&stale.operation_id]);
        assert!(!results[&unknown]);
        assert_eq!(store.get(&stale.operation_id).unwrap().status, OperationStatus::Expired);
    }

    #[test]
    fn sweep_expires_overdue_records_and_approve_then_fails() {
        let (store, _hub) = test_store();
        let op = store
            .add(sample("s1").with_timeout(Duration::zero()))
            .unwrap();

        assert_eq!(store.sweep_expired(Utc::now()), 1);
        assert_eq!(store.get(&op.operation_id).unwrap().status, OperationStatus::Expired);
        assert!(!store.approve(&op.operation_id));
        // Idempotent: nothing left to sweep.
        assert_eq!(store.sweep_expired(Utc::now()), 0);
    }

    #[test]
    fn approve_on_overdue_record_expires_it_without_a_sweep() {
        let (store, _hub) = test_store();
        let op = store
            .add(sample("s1").with_timeout(Duration::zero()))
            .unwrap();

        assert!(!store.approve(&op.operation_id));
        assert_eq!(store.get(&op.operation_id).unwrap().status, OperationStatus::Expired);
    }

    #[test]
    fn list_pending_skips_and_demotes_overdue_records() {
        let (store, _hub) = test_store();
        let fresh = store.add(sample("s1")).unwrap();
        let stale = store
            .add(sample("s1").with_timeout(Duration::zero()))
            .unwrap();

        let listed = store.list_pending(&fresh.session_id);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].operation_id, fresh.operation_id);
        assert_eq!(store.get(&stale.operation_id).unwrap().status, OperationStatus::Expired);
    }

    #[test]
    fn list_pending_is_oldest_first_and_session_scoped() {
        let (store, _hub) = test_store();
        let base = Utc::now();
        // Insert with controlled creation times, newest first.
        for (suffix, offset) in [("c", 20), ("a", 0), ("b", 10)] {
            let op = store.add(sample("s1")).unwrap();
            let mut entry = store.ops.get_mut(&op.operation_id).unwrap();
            entry.value_mut().created_at = base + Duration::seconds(offset);
            entry.value_mut().kind = format!("edit-{suffix}");
        }
        store.add(sample("other-session")).unwrap();

        let listed = store.list_pending(&SessionId::new("s1"));
        let kinds: Vec<&str> = listed
            .iter()
            .map(|op| op.kind.as_str())
            .filter(|kind| kind.starts_with("edit-"))
            .collect();
        assert_eq!(kinds, vec!["edit-a", "edit-b", "edit-c"]);
        assert!(listed.iter().all(|op| op.session_id.as_str() == "s1"));
    }

    #[test]
    fn list_recent_is_newest_first_and_includes_resolved() {
        let (store, _hub) = test_store();
        let first = store.add(sample("s1")).unwrap();
        let second = store.add(sample("s1")).unwrap();
        {
            let mut entry = store.ops.get_mut(&second.operation_id).unwrap();
            entry.value_mut().created_at = first.created_at + Duration::seconds(1);
        }
        store.approve(&first.operation_id);

        let recent = store.list_recent(&first.session_id);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].operation_id, second.operation_id);
        assert_eq!(recent[1].status, OperationStatus::Approved);
    }

    #[test]
    fn execution_transitions_follow_the_state_machine() {
        let (store, _hub) = test_store();
        let op = store.add(sample("s1")).unwrap();
        let id = op.operation_id.clone();

        // Not approved yet.
        assert!(!store.mark_executing(&id));
        assert!(store.approve(&id));
        assert!(store.mark_executing(&id));
        // Executing is not re-entrant and not completable twice.
        assert!(!store.mark_executing(&id));
        assert!(store.complete(&id, serde_json::json!({ "status": "ok" })));
        assert!(!store.fail(&id, "too late"));

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.result, Some(serde_json::json!({ "status": "ok" })));
        assert_eq!(record.error, None);
    }

    #[test]
    fn per_operation_events_arrive_in_commit_order() {
        let (store, hub) = test_store();
        let mut observer = hub.register("s1");

        let op = store.add(sample("s1")).unwrap();
        let id = op.operation_id.clone();
        store.approve(&id);
        store.mark_executing(&id);
        store.complete(&id, serde_json::json!({ "status": "ok" }));

        match observer.try_recv().expect("pending event") {
            OperationEvent::Pending(record) => assert_eq!(record.operation_id, id),
            other => panic!("expected pending, got {other:?}"),
        }
        for expected in [OperationStatus::Approved, OperationStatus::Executing] {
            match observer.try_recv().expect("status event") {
                OperationEvent::Status { status, .. } => assert_eq!(status, expected),
                other => panic!("expected status, got {other:?}"),
            }
        }
        match observer.try_recv().expect("result event") {
            OperationEvent::Result { status, result, error, .. } => {
                assert_eq!(status, OperationStatus::Completed);
                assert_eq!(result, Some(serde_json::json!({ "status": "ok" })));
                assert_eq!(error, None);
            }
            other => panic!("expected result, got {other:?}"),
        }
        assert!(observer.try_recv().is_none(), "completion must not also emit status");
    }

    #[test]
    fn rejection_event_carries_the_reason() {
        let (store, hub) = test_store();
        let mut observer = hub.register("s1");
        let op = store.add(sample("s1")).unwrap();
        store.reject(&op.operation_id, Some("User rejected".to_string()));

        observer.try_recv().expect("pending event");
        match observer.try_recv().expect("status event") {
            OperationEvent::Status { status, rejection_reason, .. } => {
                assert_eq!(status, OperationStatus::Rejected);
                assert_eq!(rejection_reason.as_deref(), Some("User rejected"));
            }
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[test]
    fn evict_removes_only_old_terminal_records() {
        let (store, _hub) = test_store();
        let done = store.add(sample("s1")).unwrap();
        store.approve(&done.operation_id);
        store.mark_executing(&done.operation_id);
        store.complete(&done.operation_id, serde_json::json!({}));
        let live = store.add(sample("s1")).unwrap();

        // Nothing is old enough yet.
        assert_eq!(store.evict_resolved(Utc::now()), 0);

        let later = Utc::now() + Duration::seconds(7200);
        assert_eq!(store.evict_resolved(later), 1);
        assert!(store.get(&done.operation_id).is_none());
        assert!(store.get(&live.operation_id).is_some(), "pending records are never evicted");
    }
}
