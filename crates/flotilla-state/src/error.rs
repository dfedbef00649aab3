//! Error types for the flotilla ledger.

use thiserror::Error;

use crate::types::DeploymentStatus;

/// Result type alias for ledger operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("deployment name already in use: {0}")]
    DuplicateName(String),

    #[error("illegal status transition for deployment {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: DeploymentStatus,
        to: DeploymentStatus,
    },
}
