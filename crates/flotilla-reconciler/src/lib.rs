//! flotilla-reconciler — the periodic drift-correction sweep.
//!
//! The reconciler keeps the deployment ledger consistent with remote
//! reality and with each owner's ability to pay:
//!
//! - deployments whose remote resource went inactive are redeployed
//!   (one attempt per sweep interval),
//! - elapsed time is metered into recurring charges against the owner's
//!   balance via the external billing collaborator,
//! - deployments whose owner cannot cover the charge are deleted and
//!   the action is recorded in the maintenance log.
//!
//! Sweeps page the active set in creation order; every deployment is
//! processed in its own failure-isolated unit. At most one sweep runs
//! at a time — a sweep that finds one already running exits immediately
//! instead of queuing.

pub mod billing;
pub mod reconciler;

pub use billing::{Billing, BillingError, CatalogError, WorkloadCatalog};
pub use reconciler::{MaintenanceReconciler, ReconcilerConfig, SweepOutcome, SweepSummary};
