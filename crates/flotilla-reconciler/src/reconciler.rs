//! MaintenanceReconciler — the periodic, batched sweep.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};

use flotilla_deploy::{DeletionService, ProvisioningWorkflow};
use flotilla_provider::ProviderApi;
use flotilla_state::{Deployment, Ledger, MaintenanceAction, MaintenanceEntry};

use crate::billing::{Billing, BillingError, WorkloadCatalog};

/// Reconciler tuning.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Pause between sweeps.
    pub sweep_interval: Duration,
    /// Liveness is re-checked once a deployment's last check is older
    /// than this.
    pub staleness_window: Duration,
    /// Recurring charge period. A deployment is first metered one full
    /// period after creation.
    pub billing_interval: Duration,
    /// Deployments per sweep page.
    pub page_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            staleness_window: Duration::from_secs(3600),
            billing_interval: Duration::from_secs(24 * 3600),
            page_size: 50,
        }
    }
}

/// Counters for one completed sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub redeployed: usize,
    pub charged: usize,
    pub deleted: usize,
    pub errors: usize,
}

/// Result of a sweep request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepSummary),
    /// Another sweep was already running; nothing was done.
    Skipped,
}

/// What happened to a single deployment during a sweep.
#[derive(Default)]
struct ItemReport {
    redeployed: bool,
    charged: bool,
    deleted: bool,
    errors: usize,
}

/// The periodic batch process that corrects drift between the ledger,
/// the remote provider, and the owners' balances.
pub struct MaintenanceReconciler {
    ledger: Ledger,
    provider: Arc<dyn ProviderApi>,
    workflow: ProvisioningWorkflow,
    deleter: DeletionService,
    billing: Arc<dyn Billing>,
    catalog: Arc<dyn WorkloadCatalog>,
    config: ReconcilerConfig,
    /// Instance-owned reentrancy guard: at most one sweep at a time in
    /// this process.
    sweep_active: AtomicBool,
}

impl MaintenanceReconciler {
    pub fn new(
        ledger: Ledger,
        provider: Arc<dyn ProviderApi>,
        workflow: ProvisioningWorkflow,
        deleter: DeletionService,
        billing: Arc<dyn Billing>,
        catalog: Arc<dyn WorkloadCatalog>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            provider,
            workflow,
            deleter,
            billing,
            catalog,
            config,
            sweep_active: AtomicBool::new(false),
        }
    }

    /// Run one sweep, unless one is already in flight.
    pub async fn sweep(&self) -> SweepOutcome {
        if self
            .sweep_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("previous sweep still running, skipping");
            return SweepOutcome::Skipped;
        }

        let summary = self.run_sweep().await;
        self.sweep_active.store(false, Ordering::SeqCst);

        info!(
            examined = summary.examined,
            redeployed = summary.redeployed,
            charged = summary.charged,
            deleted = summary.deleted,
            errors = summary.errors,
            "maintenance sweep completed"
        );
        SweepOutcome::Completed(summary)
    }

    /// The reconciler loop. Runs until the shutdown channel fires.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            "maintenance reconciler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    info!("maintenance reconciler shutting down");
                    break;
                }
            }
        }
    }

    /// Page through the active set in creation order. One deployment's
    /// failure never aborts the page or the sweep.
    async fn run_sweep(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let mut offset = 0usize;

        loop {
            let page = match self
                .ledger
                .page_active_deployments(offset, self.config.page_size)
            {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, offset, "failed to read sweep page");
                    summary.errors += 1;
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            let mut deleted_in_page = 0usize;
            for deployment in page {
                let report = self.process_deployment(&deployment).await;
                summary.examined += 1;
                summary.errors += report.errors;
                if report.redeployed {
                    summary.redeployed += 1;
                }
                if report.charged {
                    summary.charged += 1;
                }
                if report.deleted {
                    summary.deleted += 1;
                    deleted_in_page += 1;
                }
            }

            if page_len < self.config.page_size {
                break;
            }
            // Deletions shrink the active set under the cursor; advance
            // only past the rows that are still active.
            offset += page_len - deleted_in_page;
        }

        summary
    }

    /// The per-deployment state machine: liveness first, then metering.
    async fn process_deployment(&self, deployment: &Deployment) -> ItemReport {
        let mut report = ItemReport::default();
        let now = epoch_secs();

        self.check_liveness(deployment, now, &mut report).await;
        if !report.deleted {
            self.meter(deployment, now, &mut report).await;
        }
        report
    }

    /// Probe a stale deployment's remote resource; redeploy if inactive.
    async fn check_liveness(&self, deployment: &Deployment, now: u64, report: &mut ItemReport) {
        let last_checked = deployment
            .last_status_checked_at
            .unwrap_or(deployment.created_at);
        if now.saturating_sub(last_checked) < self.config.staleness_window.as_secs() {
            return;
        }

        let liveness = match self.probe_liveness_any(deployment).await {
            Ok(liveness) => liveness,
            Err(e) => {
                // Leave the stamp stale; the next sweep retries the probe.
                warn!(deployment = %deployment.id, error = %e, "liveness probe failed");
                report.errors += 1;
                return;
            }
        };

        if liveness {
            if let Err(e) = self.ledger.touch_status_check(&deployment.id, now) {
                error!(deployment = %deployment.id, error = %e, "failed to stamp liveness check");
                report.errors += 1;
            }
            return;
        }

        info!(
            deployment = %deployment.id,
            remote_name = %deployment.remote_name,
            "inactive resource detected, redeploying"
        );
        match self.workflow.redeploy(&deployment.id).await {
            Ok(redeployed) => {
                report.redeployed = true;
                self.log_maintenance(
                    deployment,
                    MaintenanceAction::Redeploy,
                    "inactive_resource",
                    now,
                    report,
                );
                debug!(
                    deployment = %deployment.id,
                    remote_name = %redeployed.remote_name,
                    account = %redeployed.account,
                    "redeployed"
                );
            }
            Err(e) => {
                // One attempt per sweep interval; the row keeps its state
                // and the error is recorded for the operator.
                warn!(deployment = %deployment.id, error = %e, "redeploy failed");
                report.errors += 1;
                self.log_maintenance(
                    deployment,
                    MaintenanceAction::Redeploy,
                    &format!("redeploy failed: {e}"),
                    now,
                    report,
                );
            }
        }
    }

    /// Meter elapsed time into a recurring charge; delete the
    /// deployment when the owner cannot pay.
    async fn meter(&self, deployment: &Deployment, now: u64, report: &mut ItemReport) {
        let last_charge = deployment
            .last_billing_charge_at
            .unwrap_or(deployment.created_at);
        if now.saturating_sub(last_charge) < self.config.billing_interval.as_secs() {
            return;
        }

        let cost = match self.catalog.recurring_cost(deployment.workload_id).await {
            Ok(cost) => cost,
            Err(e) => {
                warn!(
                    deployment = %deployment.id,
                    workload = deployment.workload_id,
                    error = %e,
                    "cost lookup failed"
                );
                report.errors += 1;
                return;
            }
        };

        match self.billing.debit(deployment.owner_id, cost).await {
            Ok(()) => {
                debug!(
                    deployment = %deployment.id,
                    owner = deployment.owner_id,
                    cost,
                    "recurring charge debited"
                );
                report.charged = true;
                if let Err(e) = self.ledger.touch_billing_charge(&deployment.id, now) {
                    error!(deployment = %deployment.id, error = %e, "failed to stamp billing charge");
                    report.errors += 1;
                }
            }
            Err(BillingError::InsufficientFunds) => {
                warn!(
                    deployment = %deployment.id,
                    owner = deployment.owner_id,
                    cost,
                    "owner cannot cover recurring charge, deleting"
                );
                match self.deleter.delete(&deployment.id).await {
                    Ok(_) => {
                        report.deleted = true;
                        self.log_maintenance(
                            deployment,
                            MaintenanceAction::Delete,
                            "insufficient_funds",
                            now,
                            report,
                        );
                    }
                    Err(e) => {
                        error!(deployment = %deployment.id, error = %e, "funded-owner deletion failed");
                        report.errors += 1;
                    }
                }
            }
            Err(BillingError::Unavailable(e)) => {
                warn!(deployment = %deployment.id, error = %e, "billing unavailable, skipping charge");
                report.errors += 1;
            }
        }
    }

    /// Probe liveness under the assigned account first, then any other
    /// active account. Errors only if every candidate fails.
    async fn probe_liveness_any(
        &self,
        deployment: &Deployment,
    ) -> Result<bool, flotilla_provider::ProviderError> {
        let mut candidates = Vec::new();
        if self
            .ledger
            .get_account(&deployment.assigned_account)
            .ok()
            .flatten()
            .is_some_and(|a| a.active)
        {
            candidates.push(deployment.assigned_account.clone());
        }
        let mut others: Vec<String> = self
            .ledger
            .list_active_accounts()
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.credential)
            .filter(|c| *c != deployment.assigned_account)
            .collect();
        others.shuffle(&mut rand::rng());
        candidates.extend(others);

        let mut last_error = flotilla_provider::ProviderError::Transient(
            "no active account to probe with".to_string(),
        );
        for credential in &candidates {
            match self
                .provider
                .probe_liveness(credential, &deployment.remote_name)
                .await
            {
                Ok(liveness) => return Ok(liveness.active),
                Err(e) => {
                    debug!(
                        deployment = %deployment.id,
                        account = %credential,
                        error = %e,
                        "liveness probe attempt failed"
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn log_maintenance(
        &self,
        deployment: &Deployment,
        action: MaintenanceAction,
        reason: &str,
        now: u64,
        report: &mut ItemReport,
    ) {
        let entry = MaintenanceEntry {
            deployment_id: deployment.id.clone(),
            owner_id: deployment.owner_id,
            action,
            reason: reason.to_string(),
            created_at: now,
        };
        if let Err(e) = self.ledger.append_maintenance(&entry) {
            error!(deployment = %deployment.id, error = %e, "failed to append maintenance log");
            report.errors += 1;
        }
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
