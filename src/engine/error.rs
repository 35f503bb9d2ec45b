use thiserror::Error;
use ulid::Ulid;

use crate::model::RequestStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("request {request} conflicts with approved request {existing}")]
    Conflict { request: Ulid, existing: Ulid },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("request {id} is already {status}")]
    InvalidState { id: Ulid, status: RequestStatus },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// True for failures the caller caused; false for server-side failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::Storage(_))
    }
}
