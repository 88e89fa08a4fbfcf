//! Coordinator core for Greenlight.
//!
//! Pending-operation records, the lifecycle store, notification fan-out to
//! session observers, and the approved-operation executor.

mod error;
mod events;
mod executor;
mod hub;
mod store;
mod sweeper;
mod types;

pub use error::{CoordinatorError, Result};
pub use events::OperationEvent;
pub use executor::{ExecutionReport, MutationRunner, OperationExecutor};
pub use hub::{NotificationHub, ObserverHandle};
pub use store::{OperationStore, StoreConfig};
pub use sweeper::spawn_sweeper_loop;
pub use types::{DiffPreview, NewOperation, Operation, OperationId, OperationStatus, SessionId};
