use crate::types::OperationStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("operation not found: {0}")]
    NotFound(String),

    #[error("duplicate operation id: {0}")]
    DuplicateId(String),

    #[error("invalid operation state: {0}")]
    InvalidState(OperationStatus),
}
