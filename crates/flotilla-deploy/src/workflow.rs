//! ProvisioningWorkflow — ordered remote steps with compensating rollback.
//!
//! An attempt is: select account → insert `Pending` row → create →
//! configure → build → capacity re-probe → mark `Active`. Any failure
//! in the create/configure/build window rolls back: one best-effort
//! delete of the just-created resource, the row marked `Failed` with
//! the triggering error verbatim, and the account's failure counter
//! bumped. The capacity re-probe is observability only and never rolls
//! back a deployment.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use flotilla_pool::AccountPool;
use flotilla_provider::{ProviderApi, ProviderError};
use flotilla_state::{DeploymentId, DeploymentStatus, Ledger, NewDeployment, OwnerId, WorkloadId};

use crate::error::{DeployError, DeployResult, ProvisionStep};
use crate::names;

/// Workflow tuning.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Appended to the sanitized requested name to form the remote name.
    pub remote_name_suffix: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            remote_name_suffix: "-fl".to_string(),
        }
    }
}

/// A provisioning request from the HTTP layer.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub owner_id: OwnerId,
    pub workload_id: WorkloadId,
    pub requested_name: String,
    /// Source reference for the provider's build step.
    pub source_ref: String,
    pub parameters: BTreeMap<String, String>,
}

/// Successful provisioning outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Provisioned {
    pub deployment_id: DeploymentId,
    pub remote_name: String,
    pub account: String,
    pub url: Option<String>,
}

/// Drives deployment attempts against the provider.
#[derive(Clone)]
pub struct ProvisioningWorkflow {
    ledger: Ledger,
    pool: AccountPool,
    provider: Arc<dyn ProviderApi>,
    config: WorkflowConfig,
}

impl ProvisioningWorkflow {
    pub fn new(
        ledger: Ledger,
        pool: AccountPool,
        provider: Arc<dyn ProviderApi>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            ledger,
            pool,
            provider,
            config,
        }
    }

    /// Provision a new deployment.
    ///
    /// On failure the row (if one was created) is `Failed` and no
    /// remote resource is knowingly left behind.
    pub async fn provision(&self, request: ProvisionRequest) -> DeployResult<Provisioned> {
        // Step 1: allocate an account. No row exists yet, so exhaustion
        // fails the request without any bookkeeping.
        let account = self
            .pool
            .select_usable_account()
            .await?
            .ok_or(DeployError::NoCapacity)?;

        let remote_name =
            names::derive_remote_name(&request.requested_name, &self.config.remote_name_suffix);

        // Step 2: the durable record that a remote resource may exist.
        let deployment = self.ledger.insert_deployment(NewDeployment {
            owner_id: request.owner_id,
            workload_id: request.workload_id,
            requested_name: request.requested_name.clone(),
            remote_name: remote_name.clone(),
            assigned_account: account.credential.clone(),
            source_ref: request.source_ref.clone(),
            parameters: request.parameters.clone(),
            created_at: epoch_secs(),
        })?;

        debug!(
            deployment = %deployment.id,
            account = %account.credential,
            %remote_name,
            "provisioning started"
        );

        // Steps 3–5.
        let url = match self
            .run_remote_steps(
                &account.credential,
                &remote_name,
                &request.parameters,
                &request.source_ref,
            )
            .await
        {
            Ok(url) => url,
            Err((step, cause)) => {
                return Err(self
                    .roll_back(&deployment.id, &account.credential, &remote_name, step, cause)
                    .await);
            }
        };

        // Step 6: refresh pool bookkeeping. Observability only.
        self.refresh_capacity(&account.credential).await;

        // Step 7: the row becomes the usable record.
        self.ledger
            .update_status(&deployment.id, DeploymentStatus::Active, None, epoch_secs())?;
        self.pool.record_success(&account.credential)?;

        info!(
            deployment = %deployment.id,
            owner = deployment.owner_id,
            account = %account.credential,
            %remote_name,
            "deployment active"
        );

        Ok(Provisioned {
            deployment_id: deployment.id,
            remote_name,
            account: account.credential,
            url,
        })
    }

    /// Re-provision an `Active` deployment whose remote resource went
    /// away. A fresh account is selected and a fresh remote name is
    /// derived; the old resource is not touched (it is already gone).
    /// On failure the row is left untouched — the next sweep retries.
    pub async fn redeploy(&self, deployment_id: &str) -> DeployResult<Provisioned> {
        let deployment = self
            .ledger
            .get_deployment(deployment_id)?
            .ok_or_else(|| DeployError::NotFound(deployment_id.to_string()))?;
        if deployment.status != DeploymentStatus::Active {
            return Err(DeployError::NotActive(deployment_id.to_string()));
        }

        let account = self
            .pool
            .select_usable_account()
            .await?
            .ok_or(DeployError::NoCapacity)?;
        let remote_name =
            names::redeploy_name(&deployment.requested_name, &self.config.remote_name_suffix);

        debug!(
            deployment = %deployment.id,
            account = %account.credential,
            %remote_name,
            "redeploy started"
        );

        let url = match self
            .run_remote_steps(
                &account.credential,
                &remote_name,
                &deployment.parameters,
                &deployment.source_ref,
            )
            .await
        {
            Ok(url) => url,
            Err((step, cause)) => {
                // Best-effort cleanup of the half-created replacement;
                // the deployment row keeps its current state.
                if let Err(e) = self
                    .provider
                    .delete_resource(&account.credential, &remote_name)
                    .await
                {
                    warn!(%remote_name, error = %e, "redeploy cleanup failed");
                }
                if let Err(e) = self.pool.record_failure(&account.credential, &cause.to_string()) {
                    error!(account = %account.credential, error = %e, "failure bookkeeping failed");
                }
                return Err(DeployError::StepFailed {
                    step,
                    deployment_id: deployment.id,
                    source: cause,
                });
            }
        };

        self.refresh_capacity(&account.credential).await;

        let deployment = self.ledger.reassign_deployment(
            &deployment.id,
            &account.credential,
            &remote_name,
            epoch_secs(),
        )?;
        self.pool.record_success(&account.credential)?;

        info!(
            deployment = %deployment.id,
            account = %account.credential,
            %remote_name,
            "deployment redeployed"
        );

        Ok(Provisioned {
            deployment_id: deployment.id,
            remote_name,
            account: account.credential,
            url,
        })
    }

    /// Steps 3–5, strictly ordered. Returns the resource URL from the
    /// create step, or the failing step and its cause.
    async fn run_remote_steps(
        &self,
        credential: &str,
        remote_name: &str,
        parameters: &BTreeMap<String, String>,
        source_ref: &str,
    ) -> Result<Option<String>, (ProvisionStep, ProviderError)> {
        let handle = self
            .provider
            .create_resource(credential, remote_name)
            .await
            .map_err(|e| (ProvisionStep::CreateResource, e))?;

        self.provider
            .set_parameters(credential, remote_name, parameters)
            .await
            .map_err(|e| (ProvisionStep::SetParameters, e))?;

        let build_id = self
            .provider
            .trigger_build(credential, remote_name, source_ref)
            .await
            .map_err(|e| (ProvisionStep::TriggerBuild, e))?;
        debug!(%remote_name, %build_id, "build triggered");

        Ok(handle.url)
    }

    /// Compensating rollback for a failed create/configure/build window:
    /// one best-effort remote delete, the row to `Failed` with the cause
    /// verbatim, and the account failure counter bumped.
    async fn roll_back(
        &self,
        deployment_id: &str,
        credential: &str,
        remote_name: &str,
        step: ProvisionStep,
        cause: ProviderError,
    ) -> DeployError {
        warn!(
            deployment = %deployment_id,
            %step,
            error = %cause,
            "provisioning failed, rolling back"
        );

        if let Err(e) = self.provider.delete_resource(credential, remote_name).await {
            // At-most-once cleanup: a failure here may leak the remote
            // resource, which is accepted.
            warn!(%remote_name, error = %e, "rollback deletion failed");
        }

        let message = cause.to_string();
        if let Err(e) =
            self.ledger
                .update_status(deployment_id, DeploymentStatus::Failed, Some(&message), epoch_secs())
        {
            error!(deployment = %deployment_id, error = %e, "failed to record failure");
        }
        if let Err(e) = self.pool.record_failure(credential, &message) {
            error!(account = %credential, error = %e, "failure bookkeeping failed");
        }

        DeployError::StepFailed {
            step,
            deployment_id: deployment_id.to_string(),
            source: cause,
        }
    }

    /// Post-success capacity refresh. A failed probe falls back to
    /// bumping the cached counter so observed usage still reflects the
    /// new resource.
    async fn refresh_capacity(&self, credential: &str) {
        match self.provider.probe_capacity(credential).await {
            Ok(snapshot) => {
                if let Err(e) = self.pool.record_capacity_snapshot(credential, snapshot.count) {
                    error!(account = %credential, error = %e, "capacity bookkeeping failed");
                }
            }
            Err(e) => {
                warn!(account = %credential, error = %e, "post-provision capacity probe failed");
                if let Err(e) = self.ledger.bump_capacity_used(credential) {
                    error!(account = %credential, error = %e, "capacity bookkeeping failed");
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_provider::testing::{FakeProvider, Op};
    use flotilla_state::HostingAccount;

    fn setup() -> (Ledger, Arc<FakeProvider>, ProvisioningWorkflow) {
        let ledger = Ledger::open_in_memory().unwrap();
        let provider = Arc::new(FakeProvider::new());
        let pool = AccountPool::new(ledger.clone(), provider.clone());
        let workflow = ProvisioningWorkflow::new(
            ledger.clone(),
            pool,
            provider.clone(),
            WorkflowConfig::default(),
        );
        (ledger, provider, workflow)
    }

    fn add_account(ledger: &Ledger, provider: &FakeProvider, credential: &str) {
        ledger
            .put_account(&HostingAccount::new(credential, 98, 1000))
            .unwrap();
        provider.register_account(credential, 98);
    }

    fn request(name: &str) -> ProvisionRequest {
        ProvisionRequest {
            owner_id: 7,
            workload_id: 42,
            requested_name: name.to_string(),
            source_ref: "github.com/acme/worker/tarball/main".to_string(),
            parameters: BTreeMap::from([("SESSION".to_string(), "abc".to_string())]),
        }
    }

    #[tokio::test]
    async fn provision_happy_path() {
        let (ledger, provider, workflow) = setup();
        add_account(&ledger, &provider, "key-a");

        let result = workflow.provision(request("foo")).await.unwrap();
        assert_eq!(result.remote_name, "foo-fl");
        assert_eq!(result.account, "key-a");

        let deployment = ledger.get_deployment(&result.deployment_id).unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Active);
        assert_eq!(deployment.assigned_account, "key-a");
        assert!(deployment.error_message.is_none());

        // Observed usage reflects the new resource.
        let account = ledger.get_account("key-a").unwrap().unwrap();
        assert!(account.capacity_used >= 1);
        assert_eq!(account.successful_deployments, 1);

        // Ordered steps, each exactly once.
        assert_eq!(provider.count_calls(Op::Create, "foo-fl"), 1);
        assert_eq!(provider.count_calls(Op::SetParameters, "foo-fl"), 1);
        assert_eq!(provider.count_calls(Op::TriggerBuild, "foo-fl"), 1);
        assert_eq!(provider.count_calls(Op::Delete, "foo-fl"), 0);
    }

    #[tokio::test]
    async fn provision_without_capacity_creates_no_row() {
        let (ledger, _provider, workflow) = setup();

        let result = workflow.provision(request("foo")).await;
        assert!(matches!(result, Err(DeployError::NoCapacity)));
        assert!(ledger.list_deployments_for_owner(7).unwrap().is_empty());
    }

    #[tokio::test]
    async fn configure_failure_rolls_back() {
        let (ledger, provider, workflow) = setup();
        add_account(&ledger, &provider, "key-a");
        provider.fail_next_for_name(
            Op::SetParameters,
            "foo-fl",
            ProviderError::Transient("set parameters: timed out".into()),
        );

        let err = workflow.provision(request("foo")).await.unwrap_err();
        let DeployError::StepFailed {
            step,
            deployment_id,
            source,
        } = err
        else {
            panic!("expected StepFailed");
        };
        assert_eq!(step, ProvisionStep::SetParameters);
        assert!(source.is_transient());

        // The row exists, is failed, and carries the cause verbatim.
        let deployment = ledger.get_deployment(&deployment_id).unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert!(deployment.error_message.unwrap().contains("timed out"));

        // Exactly one rollback delete under the assigned account.
        assert_eq!(provider.count_calls(Op::Delete, "foo-fl"), 1);
        assert!(
            provider
                .calls()
                .iter()
                .all(|c| c.credential == "key-a")
        );
        assert!(provider.resource_owner("foo-fl").is_none());

        // The account took the failure on its counter.
        let account = ledger.get_account("key-a").unwrap().unwrap();
        assert_eq!(account.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn name_conflict_fails_the_create_step() {
        let (ledger, provider, workflow) = setup();
        add_account(&ledger, &provider, "key-a");
        add_account(&ledger, &provider, "key-b");
        provider.seed_resource("key-b", "foo-fl");

        let err = workflow.provision(request("foo")).await.unwrap_err();
        let DeployError::StepFailed { step, deployment_id, source } = err else {
            panic!("expected StepFailed");
        };
        assert_eq!(step, ProvisionStep::CreateResource);
        assert!(matches!(source, ProviderError::Conflict(_)));

        let deployment = ledger.get_deployment(&deployment_id).unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
    }

    #[tokio::test]
    async fn build_failure_rolls_back() {
        let (ledger, provider, workflow) = setup();
        add_account(&ledger, &provider, "key-a");
        provider.fail_next_for_name(
            Op::TriggerBuild,
            "foo-fl",
            ProviderError::Transient("build backend unavailable".into()),
        );

        let err = workflow.provision(request("foo")).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::StepFailed {
                step: ProvisionStep::TriggerBuild,
                ..
            }
        ));
        assert_eq!(provider.count_calls(Op::Delete, "foo-fl"), 1);
        assert!(provider.resource_owner("foo-fl").is_none());
    }

    #[tokio::test]
    async fn failed_reprobe_still_bumps_observed_usage() {
        let (ledger, provider, workflow) = setup();
        add_account(&ledger, &provider, "key-a");
        // The selection probe passes; the post-provision re-probe fails.
        provider.pass_next(Op::ProbeCapacity, "key-a");
        provider.fail_next(
            Op::ProbeCapacity,
            "key-a",
            ProviderError::Transient("flaky".into()),
        );

        let result = workflow.provision(request("foo")).await.unwrap();

        // Selection saw 0 resources; the fallback bump still records the
        // one just created.
        let account = ledger.get_account("key-a").unwrap().unwrap();
        assert_eq!(account.capacity_used, 1);

        let deployment = ledger.get_deployment(&result.deployment_id).unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Active);
    }

    #[tokio::test]
    async fn redeploy_moves_to_fresh_name_and_account() {
        let (ledger, provider, workflow) = setup();
        add_account(&ledger, &provider, "key-a");

        let provisioned = workflow.provision(request("foo")).await.unwrap();
        provider.set_inactive("foo-fl");

        let redeployed = workflow.redeploy(&provisioned.deployment_id).await.unwrap();
        assert_ne!(redeployed.remote_name, "foo-fl");
        assert!(redeployed.remote_name.starts_with("foo-fl-"));

        let deployment = ledger
            .get_deployment(&provisioned.deployment_id)
            .unwrap()
            .unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Active);
        assert_eq!(deployment.remote_name, redeployed.remote_name);
    }

    #[tokio::test]
    async fn redeploy_failure_leaves_row_untouched() {
        let (ledger, provider, workflow) = setup();
        add_account(&ledger, &provider, "key-a");
        let provisioned = workflow.provision(request("foo")).await.unwrap();

        // Every later create under key-a fails.
        provider.fail_next(
            Op::Create,
            "key-a",
            ProviderError::Transient("create: timed out".into()),
        );

        let err = workflow.redeploy(&provisioned.deployment_id).await.unwrap_err();
        assert!(matches!(err, DeployError::StepFailed { .. }));

        let deployment = ledger
            .get_deployment(&provisioned.deployment_id)
            .unwrap()
            .unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Active);
        assert_eq!(deployment.remote_name, "foo-fl");
        assert_eq!(deployment.assigned_account, "key-a");
    }

    #[tokio::test]
    async fn redeploy_requires_active_row() {
        let (ledger, provider, workflow) = setup();
        add_account(&ledger, &provider, "key-a");
        provider.fail_next_for_name(
            Op::SetParameters,
            "foo-fl",
            ProviderError::Transient("nope".into()),
        );
        let err = workflow.provision(request("foo")).await.unwrap_err();
        let DeployError::StepFailed { deployment_id, .. } = err else {
            panic!("expected StepFailed");
        };

        let result = workflow.redeploy(&deployment_id).await;
        assert!(matches!(result, Err(DeployError::NotActive(_))));
    }

    #[tokio::test]
    async fn redeploy_unknown_deployment() {
        let (_ledger, _provider, workflow) = setup();
        let result = workflow.redeploy("0000000042").await;
        assert!(matches!(result, Err(DeployError::NotFound(_))));
    }
}
