//! Ledger — redb-backed persistence for flotilla.
//!
//! Provides typed CRUD operations over hosting accounts, deployments,
//! and the maintenance log. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! Deployment status changes run inside a single write transaction with
//! the legal-transition check as a precondition, so two concurrent
//! operations cannot both succeed against contradictory assumptions.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe ledger backed by redb.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
}

impl Ledger {
    /// Open (or create) a persistent ledger at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!(?path, "ledger opened");
        Ok(ledger)
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!("in-memory ledger opened");
        Ok(ledger)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(MAINTENANCE_LOG).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Hosting accounts ───────────────────────────────────────────

    /// Insert or update a hosting account.
    pub fn put_account(&self, account: &HostingAccount) -> StateResult<()> {
        let value = serde_json::to_vec(account).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
            table
                .insert(account.credential.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(account = %account.credential, "account stored");
        Ok(())
    }

    /// Get an account by credential.
    pub fn get_account(&self, credential: &str) -> StateResult<Option<HostingAccount>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
        match table.get(credential).map_err(map_err!(Read))? {
            Some(guard) => {
                let account: HostingAccount =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    /// List all accounts.
    pub fn list_accounts(&self) -> StateResult<Vec<HostingAccount>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let account: HostingAccount =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(account);
        }
        Ok(results)
    }

    /// List accounts usable for new allocations.
    pub fn list_active_accounts(&self) -> StateResult<Vec<HostingAccount>> {
        Ok(self
            .list_accounts()?
            .into_iter()
            .filter(|a| a.active)
            .collect())
    }

    /// Read-modify-write a single account row inside one write transaction.
    fn update_account<F>(&self, credential: &str, mutate: F) -> StateResult<HostingAccount>
    where
        F: FnOnce(&mut HostingAccount),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let account = {
            let mut table = txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
            let mut account: HostingAccount = match table.get(credential).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("account {credential}"))),
            };
            mutate(&mut account);
            let value = serde_json::to_vec(&account).map_err(map_err!(Serialize))?;
            table
                .insert(credential, value.as_slice())
                .map_err(map_err!(Write))?;
            account
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(account)
    }

    /// Record a fresh capacity probe result.
    pub fn record_capacity(
        &self,
        credential: &str,
        used: u32,
        now: u64,
    ) -> StateResult<HostingAccount> {
        self.update_account(credential, |a| {
            a.capacity_used = used;
            a.last_checked_at = Some(now);
        })
    }

    /// Bump the observed usage by one without a probe. Used when the
    /// post-provision re-probe fails but a resource was created.
    pub fn bump_capacity_used(&self, credential: &str) -> StateResult<HostingAccount> {
        self.update_account(credential, |a| {
            a.capacity_used = a.capacity_used.saturating_add(1);
        })
    }

    /// Record a failed remote operation against an account.
    pub fn record_account_failure(
        &self,
        credential: &str,
        reason: &str,
        now: u64,
    ) -> StateResult<HostingAccount> {
        self.update_account(credential, |a| {
            a.consecutive_failures += 1;
            a.error_message = Some(reason.to_string());
            a.last_failed_at = Some(now);
        })
    }

    /// Record a successful deployment under an account.
    pub fn record_account_success(&self, credential: &str, now: u64) -> StateResult<HostingAccount> {
        self.update_account(credential, |a| {
            a.successful_deployments += 1;
            a.consecutive_failures = 0;
            a.last_used_at = Some(now);
        })
    }

    /// Stamp an account as just handed out by selection.
    pub fn mark_account_used(&self, credential: &str, now: u64) -> StateResult<HostingAccount> {
        self.update_account(credential, |a| {
            a.last_used_at = Some(now);
        })
    }

    /// Remove an account from the allocation pool. The row is kept.
    pub fn deactivate_account(
        &self,
        credential: &str,
        reason: &str,
        now: u64,
    ) -> StateResult<HostingAccount> {
        self.update_account(credential, |a| {
            a.active = false;
            a.error_message = Some(reason.to_string());
            a.last_failed_at = Some(now);
        })
    }

    /// Put an account back into the allocation pool after an explicit
    /// re-validation probe succeeded.
    pub fn reactivate_account(&self, credential: &str, now: u64) -> StateResult<HostingAccount> {
        self.update_account(credential, |a| {
            a.active = true;
            a.consecutive_failures = 0;
            a.error_message = None;
            a.last_checked_at = Some(now);
        })
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert a new deployment row in `Pending` status, assigning the
    /// next sequence id. Rejects a requested name already used by a
    /// non-deleted deployment.
    pub fn insert_deployment(&self, new: NewDeployment) -> StateResult<Deployment> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deployment = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;

            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let existing: Deployment =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if existing.status != DeploymentStatus::Deleted
                    && existing.requested_name == new.requested_name
                {
                    return Err(StateError::DuplicateName(new.requested_name));
                }
            }

            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let seq = meta
                .get("deployment_seq")
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0)
                + 1;
            meta.insert("deployment_seq", seq).map_err(map_err!(Write))?;

            let deployment = Deployment {
                id: format!("{seq:010}"),
                owner_id: new.owner_id,
                workload_id: new.workload_id,
                requested_name: new.requested_name,
                remote_name: new.remote_name,
                status: DeploymentStatus::Pending,
                assigned_account: new.assigned_account,
                source_ref: new.source_ref,
                parameters: new.parameters,
                error_message: None,
                created_at: new.created_at,
                last_status_checked_at: None,
                last_billing_charge_at: None,
            };
            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            deployment
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %deployment.id, name = %deployment.requested_name, "deployment inserted");
        Ok(deployment)
    }

    /// Get a deployment by id.
    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    /// Find a non-deleted deployment by its requested name.
    pub fn find_deployment_by_name(&self, requested_name: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if deployment.status != DeploymentStatus::Deleted
                && deployment.requested_name == requested_name
            {
                return Ok(Some(deployment));
            }
        }
        Ok(None)
    }

    /// All deployments belonging to one owner (read-only projection for
    /// the HTTP layer).
    pub fn list_deployments_for_owner(&self, owner_id: OwnerId) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if deployment.owner_id == owner_id {
                results.push(deployment);
            }
        }
        Ok(results)
    }

    /// One page of `Active` deployments in creation order. Sweep batching.
    pub fn page_active_deployments(
        &self,
        offset: usize,
        limit: usize,
    ) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut seen = 0usize;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if deployment.status != DeploymentStatus::Active {
                continue;
            }
            if seen >= offset {
                results.push(deployment);
                if results.len() >= limit {
                    break;
                }
            }
            seen += 1;
        }
        Ok(results)
    }

    /// Transition a deployment's status atomically.
    ///
    /// The current status is re-read inside the write transaction and the
    /// transition is checked against the legal set; a row that moved under
    /// us is rejected with [`StateError::IllegalTransition`] instead of
    /// being overwritten. Stamps `last_status_checked_at`.
    pub fn update_status(
        &self,
        id: &str,
        next: DeploymentStatus,
        error_message: Option<&str>,
        now: u64,
    ) -> StateResult<Deployment> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deployment = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut deployment: Deployment = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("deployment {id}"))),
            };
            if !deployment.status.can_transition_to(next) {
                return Err(StateError::IllegalTransition {
                    id: id.to_string(),
                    from: deployment.status,
                    to: next,
                });
            }
            deployment.status = next;
            deployment.error_message = error_message.map(str::to_string);
            deployment.last_status_checked_at = Some(now);
            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            deployment
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %id, status = %next, "status updated");
        Ok(deployment)
    }

    /// Read-modify-write a deployment row without a status change.
    fn update_deployment<F>(&self, id: &str, mutate: F) -> StateResult<Deployment>
    where
        F: FnOnce(&mut Deployment),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deployment = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut deployment: Deployment = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("deployment {id}"))),
            };
            mutate(&mut deployment);
            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            deployment
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(deployment)
    }

    /// Point an `Active` deployment at a new account and remote name
    /// after a redeploy. Rejected for any other status.
    pub fn reassign_deployment(
        &self,
        id: &str,
        account: &str,
        remote_name: &str,
        now: u64,
    ) -> StateResult<Deployment> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let deployment = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut deployment: Deployment = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("deployment {id}"))),
            };
            if deployment.status != DeploymentStatus::Active {
                return Err(StateError::IllegalTransition {
                    id: id.to_string(),
                    from: deployment.status,
                    to: DeploymentStatus::Active,
                });
            }
            deployment.assigned_account = account.to_string();
            deployment.remote_name = remote_name.to_string();
            deployment.last_status_checked_at = Some(now);
            let value = serde_json::to_vec(&deployment).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            deployment
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %id, %account, %remote_name, "deployment reassigned");
        Ok(deployment)
    }

    /// Stamp the liveness-check timestamp.
    pub fn touch_status_check(&self, id: &str, now: u64) -> StateResult<Deployment> {
        self.update_deployment(id, |d| {
            d.last_status_checked_at = Some(now);
        })
    }

    /// Stamp the billing-charge timestamp.
    pub fn touch_billing_charge(&self, id: &str, now: u64) -> StateResult<Deployment> {
        self.update_deployment(id, |d| {
            d.last_billing_charge_at = Some(now);
        })
    }

    // ── Maintenance log ────────────────────────────────────────────

    /// Append a maintenance-log entry.
    pub fn append_maintenance(&self, entry: &MaintenanceEntry) -> StateResult<()> {
        let value = serde_json::to_vec(entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let seq = meta
                .get("maintenance_seq")
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0)
                + 1;
            meta.insert("maintenance_seq", seq).map_err(map_err!(Write))?;

            let key = format!("{}:{seq:010}", entry.deployment_id);
            let mut table = txn.open_table(MAINTENANCE_LOG).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// All maintenance entries for a deployment (by key prefix scan).
    pub fn list_maintenance_for_deployment(
        &self,
        deployment_id: &str,
    ) -> StateResult<Vec<MaintenanceEntry>> {
        let prefix = format!("{deployment_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MAINTENANCE_LOG).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let log_entry: MaintenanceEntry =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(log_entry);
            }
        }
        Ok(results)
    }

    /// Per-action counts over the whole log (operator stats view).
    pub fn maintenance_totals(&self) -> StateResult<MaintenanceTotals> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MAINTENANCE_LOG).map_err(map_err!(Table))?;
        let mut totals = MaintenanceTotals::default();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let log_entry: MaintenanceEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            match log_entry.action {
                MaintenanceAction::Redeploy => totals.redeploys += 1,
                MaintenanceAction::Delete => totals.deletes += 1,
            }
        }
        Ok(totals)
    }
}
