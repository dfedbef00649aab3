//! Deployment error types.

use std::fmt;

use thiserror::Error;

use flotilla_pool::PoolError;
use flotilla_provider::ProviderError;
use flotilla_state::StateError;

/// The remote step that failed an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    CreateResource,
    SetParameters,
    TriggerBuild,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionStep::CreateResource => f.write_str("create-resource"),
            ProvisionStep::SetParameters => f.write_str("set-parameters"),
            ProvisionStep::TriggerBuild => f.write_str("trigger-build"),
        }
    }
}

/// Errors that can occur while provisioning or deleting deployments.
#[derive(Debug, Error)]
pub enum DeployError {
    /// No account had spare quota. Surfaced to the requester; not
    /// retried automatically, and no ledger row was created.
    #[error("no account with spare capacity")]
    NoCapacity,

    /// A remote step failed and the attempt was rolled back. The
    /// deployment row is in `Failed` state with the triggering error.
    #[error("provisioning step {step} failed for deployment {deployment_id}: {source}")]
    StepFailed {
        step: ProvisionStep,
        deployment_id: String,
        source: ProviderError,
    },

    #[error("deployment not found: {0}")]
    NotFound(String),

    /// Redeployment was requested for a row that is not `Active`.
    #[error("deployment {0} is not active")]
    NotActive(String),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("ledger error: {0}")]
    State(#[from] StateError),
}

pub type DeployResult<T> = Result<T, DeployError>;
