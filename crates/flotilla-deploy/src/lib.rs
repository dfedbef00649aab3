//! flotilla-deploy — provisioning and decommissioning of remote resources.
//!
//! [`ProvisioningWorkflow`] turns an (owner, workload, name, parameters)
//! tuple into a running remote resource or fails cleanly: the ordered
//! remote steps (create, configure, build) are bracketed by a durable
//! `Pending` ledger row and a compensating best-effort rollback, so a
//! failed attempt never knowingly leaves an unreachable resource active.
//!
//! [`DeletionService`] is the reverse path: it removes the remote
//! resource — falling back to every other active account when the
//! original one is unusable — and always clears the local record, even
//! when no account could confirm the remote deletion.

pub mod deletion;
pub mod error;
pub mod names;
pub mod workflow;

pub use deletion::{DeletionOutcome, DeletionService};
pub use error::{DeployError, DeployResult, ProvisionStep};
pub use workflow::{ProvisionRequest, Provisioned, ProvisioningWorkflow, WorkflowConfig};
