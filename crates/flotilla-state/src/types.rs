//! Domain types for the flotilla ledger.
//!
//! These types represent the persisted state of hosting accounts,
//! deployments, and maintenance-log entries. All types are serializable
//! to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Store-assigned deployment identifier (zero-padded sequence number).
pub type DeploymentId = String;

/// Identifier of the owning user in the external user/billing store.
pub type OwnerId = u64;

/// Identifier of the workload being deployed (external catalog).
pub type WorkloadId = u64;

// ── Hosting account ───────────────────────────────────────────────

/// A credential for the third-party hosting provider, with a fixed
/// quota of resources it may own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostingAccount {
    /// The opaque credential itself. Unique; doubles as the row key.
    pub credential: String,
    /// Usable for new allocations.
    pub active: bool,
    /// Last observed resource count. Informational — selection always
    /// re-probes the provider.
    pub capacity_used: u32,
    /// Fixed quota for this credential (e.g. 98).
    pub capacity_limit: u32,
    pub consecutive_failures: u32,
    pub successful_deployments: u64,
    /// Last recorded failure classification.
    pub error_message: Option<String>,
    pub last_checked_at: Option<u64>,
    pub last_failed_at: Option<u64>,
    pub last_used_at: Option<u64>,
    pub created_at: u64,
}

impl HostingAccount {
    /// A fresh, active account with no observed usage.
    pub fn new(credential: &str, capacity_limit: u32, created_at: u64) -> Self {
        Self {
            credential: credential.to_string(),
            active: true,
            capacity_used: 0,
            capacity_limit,
            consecutive_failures: 0,
            successful_deployments: 0,
            error_message: None,
            last_checked_at: None,
            last_failed_at: None,
            last_used_at: None,
            created_at,
        }
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Active,
    Failed,
    Deleted,
}

impl DeploymentStatus {
    /// The legal transition set. Everything else is a state conflict.
    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Active) | (Pending, Failed) | (Active, Deleted) | (Failed, Deleted)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Active => "active",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable record of one workload's attempt to run under one
/// hosting account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub owner_id: OwnerId,
    pub workload_id: WorkloadId,
    /// The unique, user-chosen name.
    pub requested_name: String,
    /// The derived name of the remote resource. Replaced on redeploy.
    pub remote_name: String,
    pub status: DeploymentStatus,
    /// Credential of the account this deployment runs under.
    pub assigned_account: String,
    /// Source reference handed to the provider's build step. Kept with
    /// the row so the reconciler can redeploy without the original caller.
    pub source_ref: String,
    /// Runtime parameters applied to the remote resource.
    pub parameters: BTreeMap<String, String>,
    /// Set only when `status` is `Failed`.
    pub error_message: Option<String>,
    pub created_at: u64,
    pub last_status_checked_at: Option<u64>,
    pub last_billing_charge_at: Option<u64>,
}

/// Caller-supplied fields for a new deployment row. The ledger assigns
/// the id and stamps the initial `Pending` status.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub owner_id: OwnerId,
    pub workload_id: WorkloadId,
    pub requested_name: String,
    pub remote_name: String,
    pub assigned_account: String,
    pub source_ref: String,
    pub parameters: BTreeMap<String, String>,
    pub created_at: u64,
}

// ── Maintenance log ───────────────────────────────────────────────

/// What the reconciler did to a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceAction {
    Redeploy,
    Delete,
}

impl fmt::Display for MaintenanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceAction::Redeploy => f.write_str("redeploy"),
            MaintenanceAction::Delete => f.write_str("delete"),
        }
    }
}

/// One maintenance-log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceEntry {
    pub deployment_id: DeploymentId,
    pub owner_id: OwnerId,
    pub action: MaintenanceAction,
    pub reason: String,
    pub created_at: u64,
}

/// Per-action counts over the whole maintenance log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceTotals {
    pub redeploys: u64,
    pub deletes: u64,
}
