use crate::events::OperationEvent;
use crate::types::SessionId;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

struct ObserverSlot {
    observer_id: Uuid,
    tx: mpsc::Sender<OperationEvent>,
}

/// Receiving end of one observer registration.
///
/// The transport layer pumps events off this handle to its client and calls
/// [`NotificationHub::unregister`] on disconnect. `recv` returning `None`
/// means the hub already dropped this observer (its channel filled up).
pub struct ObserverHandle {
    observer_id: Uuid,
    session_id: SessionId,
    rx: mpsc::Receiver<OperationEvent>,
}

impl ObserverHandle {
    pub fn observer_id(&self) -> Uuid {
        self.observer_id
    }

    pub async fn recv(&mut self) -> Option<OperationEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OperationEvent> {
        self.rx.try_recv().ok()
    }
}

/// Per-session fan-out of store transition events.
///
/// Delivery is best-effort and never blocks a state transition: each observer
/// gets a bounded channel, and an observer whose channel is full or closed is
/// dropped from the registry instead of retried. New observers receive no
/// history; they catch up through the store's pending list.
pub struct NotificationHub {
    observers: DashMap<SessionId, Vec<ObserverSlot>>,
    buffer: usize,
}

impl NotificationHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            observers: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    pub fn register(&self, session_id: impl Into<SessionId>) -> ObserverHandle {
        let session_id = session_id.into();
        let observer_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.observers
            .entry(session_id.clone())
            .or_default()
            .push(ObserverSlot { observer_id, tx });
        tracing::debug!(
            session_id = %session_id,
            observer_id = %observer_id,
            "observer registered"
        );
        ObserverHandle {
            observer_id,
            session_id,
            rx,
        }
    }

    /// Idempotent: unregistering twice, or after the hub already dropped the
    /// observer, is a no-op.
    pub fn unregister(&self, handle: &ObserverHandle) {
        let mut emptied = false;
        if let Some(mut slots) = self.observers.get_mut(&handle.session_id) {
            let before = slots.len();
            slots.retain(|slot| slot.observer_id != handle.observer_id);
            if slots.len() < before {
                tracing::debug!(
                    session_id = %handle.session_id,
                    observer_id = %handle.observer_id,
                    "observer unregistered"
                );
            }
            emptied = slots.is_empty();
        }
        if emptied {
            self.observers
                .remove_if(&handle.session_id, |_, slots| slots.is_empty());
        }
    }

    /// Delivers `event` to every live observer of the session with a
    /// non-blocking send. Observers that cannot accept the event are removed;
    /// there is no retry.
    pub fn publish(&self, session_id: &SessionId, event: OperationEvent) {
        let mut emptied = false;
        if let Some(mut slots) = self.observers.get_mut(session_id) {
            slots.retain(|slot| match slot.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(
                        session_id = %session_id,
                        observer_id = %slot.observer_id,
                        "observer channel full; dropping observer"
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        session_id = %session_id,
                        observer_id = %slot.observer_id,
                        "observer channel closed; dropping observer"
                    );
                    false
                }
            });
            emptied = slots.is_empty();
        }
        if emptied {
            self.observers.remove_if(session_id, |_, slots| slots.is_empty());
        }
    }

    pub fn observer_count(&self, session_id: &SessionId) -> usize {
        self.observers
            .get(session_id)
            .map(|slots| slots.len())
            .unwrap_or(0)
    }
}
