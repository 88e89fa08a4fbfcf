//! Workspace mutation collaborator for Greenlight.
//!
//! Stages file edits, writes, and deletes as previewable proposals and
//! applies them once approved, always inside a configured root directory.

mod error;
mod workspace;

pub use error::{MutationError, Result};
pub use workspace::{StagedMutation, WorkspaceMutator};
