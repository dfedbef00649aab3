//! DeletionService — decommission a deployment's remote resource.
//!
//! The assigned account is tried first; if it is inactive or fails, any
//! other active credential may delete the named resource (the provider
//! scopes deletion org-wide). The local row is always cleared — a
//! remote failure must never block billing and quota reconciliation.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use flotilla_provider::{ProviderApi, ProviderError};
use flotilla_state::{DeploymentStatus, Ledger};

use crate::error::{DeployError, DeployResult};

/// Outcome of a deletion request. The local record is cleared in every
/// `Ok` case; `remote_deleted` reports whether any account confirmed
/// the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub remote_deleted: bool,
}

/// Removes deployments, tolerating a dead assigned account.
#[derive(Clone)]
pub struct DeletionService {
    ledger: Ledger,
    provider: Arc<dyn ProviderApi>,
}

impl DeletionService {
    pub fn new(ledger: Ledger, provider: Arc<dyn ProviderApi>) -> Self {
        Self { ledger, provider }
    }

    /// Delete a deployment's remote resource and clear the local record.
    ///
    /// Idempotent from the caller's view: deleting an already-deleted
    /// id is a success no-op.
    pub async fn delete(&self, deployment_id: &str) -> DeployResult<DeletionOutcome> {
        let deployment = self
            .ledger
            .get_deployment(deployment_id)?
            .ok_or_else(|| DeployError::NotFound(deployment_id.to_string()))?;

        if deployment.status == DeploymentStatus::Deleted {
            debug!(deployment = %deployment_id, "already deleted");
            return Ok(DeletionOutcome {
                remote_deleted: false,
            });
        }

        let mut remote_deleted = false;
        for credential in self.candidate_accounts(&deployment.assigned_account)? {
            match self
                .provider
                .delete_resource(&credential, &deployment.remote_name)
                .await
            {
                Ok(()) => {
                    debug!(
                        deployment = %deployment_id,
                        account = %credential,
                        remote_name = %deployment.remote_name,
                        "remote resource deleted"
                    );
                    remote_deleted = true;
                    break;
                }
                Err(ProviderError::NotFound(_)) => {
                    // Nothing left to delete remotely.
                    debug!(
                        deployment = %deployment_id,
                        remote_name = %deployment.remote_name,
                        "remote resource already gone"
                    );
                    remote_deleted = true;
                    break;
                }
                Err(e) => {
                    warn!(
                        deployment = %deployment_id,
                        account = %credential,
                        error = %e,
                        "remote deletion failed, trying next account"
                    );
                }
            }
        }

        if !remote_deleted {
            warn!(
                deployment = %deployment_id,
                remote_name = %deployment.remote_name,
                "remote deletion failed under every account; clearing local record anyway"
            );
        }

        self.ledger.update_status(
            deployment_id,
            DeploymentStatus::Deleted,
            None,
            epoch_secs(),
        )?;
        info!(deployment = %deployment_id, remote_deleted, "deployment deleted");

        Ok(DeletionOutcome { remote_deleted })
    }

    /// Assigned account first (when still active), then every other
    /// active account in randomized order.
    fn candidate_accounts(&self, assigned: &str) -> DeployResult<Vec<String>> {
        let mut candidates = Vec::new();
        if self
            .ledger
            .get_account(assigned)?
            .is_some_and(|a| a.active)
        {
            candidates.push(assigned.to_string());
        }

        let mut others: Vec<String> = self
            .ledger
            .list_active_accounts()?
            .into_iter()
            .map(|a| a.credential)
            .filter(|c| c != assigned)
            .collect();
        others.shuffle(&mut rand::rng());
        candidates.extend(others);
        Ok(candidates)
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
    use std::collections::BTreeMap;

    use flotilla_provider::testing::{FakeProvider, Op};
    use flotilla_state::{HostingAccount, NewDeployment};

    fn setup() -> (Ledger, Arc<FakeProvider>, DeletionService) {
        let ledger = Ledger::open_in_memory().unwrap();
        let provider = Arc::new(FakeProvider::new());
        let service = DeletionService::new(ledger.clone(), provider.clone());
        (ledger, provider, service)
    }

    fn add_account(ledger: &Ledger, provider: &FakeProvider, credential: &str) {
        ledger
            .put_account(&HostingAccount::new(credential, 98, 1000))
            .unwrap();
        provider.register_account(credential, 98);
    }

    /// An `Active` deployment whose resource exists under `credential`.
    fn seed_deployment(
        ledger: &Ledger,
        provider: &FakeProvider,
        credential: &str,
        name: &str,
    ) -> String {
        let deployment = ledger
            .insert_deployment(NewDeployment {
                owner_id: 7,
                workload_id: 42,
                requested_name: name.to_string(),
                remote_name: format!("{name}-fl"),
                assigned_account: credential.to_string(),
                source_ref: "github.com/acme/worker/tarball/main".to_string(),
                parameters: BTreeMap::new(),
                created_at: 1000,
            })
            .unwrap();
        ledger
            .update_status(&deployment.id, DeploymentStatus::Active, None, 1100)
            .unwrap();
        provider.seed_resource(credential, &format!("{name}-fl"));
        deployment.id
    }

    #[tokio::test]
    async fn deletes_remote_and_local() {
        let (ledger, provider, service) = setup();
        add_account(&ledger, &provider, "key-a");
        let id = seed_deployment(&ledger, &provider, "key-a", "foo");

        let outcome = service.delete(&id).await.unwrap();
        assert!(outcome.remote_deleted);
        assert!(provider.resource_owner("foo-fl").is_none());

        let deployment = ledger.get_deployment(&id).unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Deleted);
    }

    #[tokio::test]
    async fn second_delete_is_a_noop_success() {
        let (ledger, provider, service) = setup();
        add_account(&ledger, &provider, "key-a");
        let id = seed_deployment(&ledger, &provider, "key-a", "foo");

        service.delete(&id).await.unwrap();
        let calls_after_first = provider.calls().len();

        let outcome = service.delete(&id).await.unwrap();
        assert!(!outcome.remote_deleted);
        // No further remote traffic.
        assert_eq!(provider.calls().len(), calls_after_first);
    }

    #[tokio::test]
    async fn falls_back_to_other_accounts() {
        let (ledger, provider, service) = setup();
        add_account(&ledger, &provider, "key-a");
        add_account(&ledger, &provider, "key-b");
        let id = seed_deployment(&ledger, &provider, "key-a", "foo");

        // The assigned account is gone from the pool and rejected by
        // the provider.
        ledger.deactivate_account("key-a", "banned", 1200).unwrap();
        provider.set_unauthorized("key-a", true);

        let outcome = service.delete(&id).await.unwrap();
        assert!(outcome.remote_deleted);
        assert!(provider.resource_owner("foo-fl").is_none());
        // Inactive assigned account was never tried.
        assert!(
            provider
                .calls()
                .iter()
                .filter(|c| c.op == Op::Delete)
                .all(|c| c.credential == "key-b")
        );
    }

    #[tokio::test]
    async fn assigned_failure_falls_through_to_next() {
        let (ledger, provider, service) = setup();
        add_account(&ledger, &provider, "key-a");
        add_account(&ledger, &provider, "key-b");
        let id = seed_deployment(&ledger, &provider, "key-a", "foo");
        provider.fail_next(
            Op::Delete,
            "key-a",
            ProviderError::Transient("timed out".into()),
        );

        let outcome = service.delete(&id).await.unwrap();
        assert!(outcome.remote_deleted);
        assert!(provider.resource_owner("foo-fl").is_none());
    }

    #[tokio::test]
    async fn local_record_cleared_even_if_remote_fails_everywhere() {
        let (ledger, provider, service) = setup();
        add_account(&ledger, &provider, "key-a");
        let id = seed_deployment(&ledger, &provider, "key-a", "foo");
        provider.fail_next(
            Op::Delete,
            "key-a",
            ProviderError::Transient("timed out".into()),
        );

        let outcome = service.delete(&id).await.unwrap();
        assert!(!outcome.remote_deleted);
        // The resource leaked remotely, but the ledger is consistent.
        assert!(provider.resource_owner("foo-fl").is_some());
        let deployment = ledger.get_deployment(&id).unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Deleted);
    }

    #[tokio::test]
    async fn missing_resource_counts_as_deleted() {
        let (ledger, provider, service) = setup();
        add_account(&ledger, &provider, "key-a");
        let id = seed_deployment(&ledger, &provider, "key-a", "foo");
        // Remote side already lost the resource.
        provider.delete_resource("key-a", "foo-fl").await.unwrap();

        let outcome = service.delete(&id).await.unwrap();
        assert!(outcome.remote_deleted);
    }

    #[tokio::test]
    async fn unknown_deployment_is_an_error() {
        let (_ledger, _provider, service) = setup();
        let result = service.delete("0000000042").await;
        assert!(matches!(result, Err(DeployError::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_deployment_can_be_deleted() {
        let (ledger, provider, service) = setup();
        add_account(&ledger, &provider, "key-a");
        let deployment = ledger
            .insert_deployment(NewDeployment {
                owner_id: 7,
                workload_id: 42,
                requested_name: "foo".to_string(),
                remote_name: "foo-fl".to_string(),
                assigned_account: "key-a".to_string(),
                source_ref: "github.com/acme/worker/tarball/main".to_string(),
                parameters: BTreeMap::new(),
                created_at: 1000,
            })
            .unwrap();
        ledger
            .update_status(&deployment.id, DeploymentStatus::Failed, Some("boom"), 1100)
            .unwrap();

        let outcome = service.delete(&deployment.id).await.unwrap();
        // Nothing existed remotely; NotFound counts as deleted.
        assert!(outcome.remote_deleted);
        let deployment = ledger.get_deployment(&deployment.id).unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Deleted);
    }
}
