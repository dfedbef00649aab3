//! The provider trait and its classified error taxonomy.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Classified outcome of a remote provider call.
///
/// `Transient` covers timeouts, connection failures, and server-side
/// errors — conditions where retrying against another account (or the
/// same account later) is reasonable. The other variants are permanent
/// for the request that produced them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The resource name is already taken.
    #[error("name conflict: {0}")]
    Conflict(String),

    /// The credential was rejected. The account is unusable until
    /// re-validated.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The resource does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeout, connection failure, or a server-side error.
    #[error("transient provider error: {0}")]
    Transient(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ProviderError::Unauthorized(_))
    }
}

/// Handle to a freshly created remote resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceHandle {
    pub name: String,
    /// Public URL of the resource, when the provider reports one.
    pub url: Option<String>,
}

/// Authoritative resource count for one credential.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacitySnapshot {
    /// Resources currently owned by the credential.
    pub count: u32,
    /// The provider-side ceiling.
    pub limit: u32,
}

/// Result of a liveness probe against one resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Liveness {
    pub active: bool,
}

/// The remote hosting-provider surface consumed by the control plane.
///
/// Implementations must bound every call with a timeout and map a
/// timeout to [`ProviderError::Transient`].
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Create an empty remote resource under the credential.
    async fn create_resource(&self, credential: &str, name: &str)
    -> ProviderResult<ResourceHandle>;

    /// Apply runtime parameters to the resource.
    async fn set_parameters(
        &self,
        credential: &str,
        name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> ProviderResult<()>;

    /// Start the build that makes the resource live. Returns the build id.
    async fn trigger_build(
        &self,
        credential: &str,
        name: &str,
        source_ref: &str,
    ) -> ProviderResult<String>;

    /// Count the resources currently owned by the credential.
    async fn probe_capacity(&self, credential: &str) -> ProviderResult<CapacitySnapshot>;

    /// Check whether the named resource is still running.
    async fn probe_liveness(&self, credential: &str, name: &str) -> ProviderResult<Liveness>;

    /// Delete the named resource.
    async fn delete_resource(&self, credential: &str, name: &str) -> ProviderResult<()>;
}
