//! Account pool error types.

use thiserror::Error;

use flotilla_provider::ProviderError;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("re-validation probe failed: {0}")]
    Revalidation(ProviderError),

    #[error("ledger error: {0}")]
    State(#[from] flotilla_state::StateError),
}

pub type PoolResult<T> = Result<T, PoolError>;
