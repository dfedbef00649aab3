//! External collaborator seams: the billing store and the workload
//! catalog. Both are async traits so tests substitute in-memory fakes
//! and the daemon wires HTTP adapters.

use async_trait::async_trait;
use thiserror::Error;

use flotilla_state::{OwnerId, WorkloadId};

/// Outcome of a billing call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BillingError {
    /// The owner's balance cannot cover the amount. Reconciler-only
    /// signal; never surfaced to a live request.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The billing collaborator could not be reached.
    #[error("billing unavailable: {0}")]
    Unavailable(String),
}

/// The external user/billing store. Amounts are in coins.
#[async_trait]
pub trait Billing: Send + Sync {
    async fn debit(&self, owner_id: OwnerId, amount: u64) -> Result<(), BillingError>;
    async fn credit(&self, owner_id: OwnerId, amount: u64) -> Result<(), BillingError>;
}

/// Workload catalog lookup failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("workload {0} not in catalog")]
    UnknownWorkload(WorkloadId),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// The external workload catalog: per-workload recurring cost.
#[async_trait]
pub trait WorkloadCatalog: Send + Sync {
    async fn recurring_cost(&self, workload_id: WorkloadId) -> Result<u64, CatalogError>;
}
