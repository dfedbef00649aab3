//! AccountPool — shuffled linear scan with fresh capacity probes.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use flotilla_provider::ProviderApi;
use flotilla_state::{HostingAccount, Ledger};

use crate::error::{PoolError, PoolResult};

/// Hands out hosting accounts with confirmed spare capacity and keeps
/// their health state current.
#[derive(Clone)]
pub struct AccountPool {
    ledger: Ledger,
    provider: Arc<dyn ProviderApi>,
}

impl AccountPool {
    pub fn new(ledger: Ledger, provider: Arc<dyn ProviderApi>) -> Self {
        Self { ledger, provider }
    }

    /// Select an account with spare capacity, or `None` if the pool is
    /// exhausted.
    ///
    /// Candidates are scanned in randomized order so no account is
    /// systematically hit first. Each candidate gets a fresh capacity
    /// probe: an `Unauthorized` response deactivates the account and the
    /// scan continues; a transient error skips it for this call only.
    /// Callers must treat `None` as "no capacity" and fail the request —
    /// selection is not retried here.
    pub async fn select_usable_account(&self) -> PoolResult<Option<HostingAccount>> {
        let mut candidates = self.ledger.list_active_accounts()?;
        candidates.shuffle(&mut rand::rng());

        for candidate in candidates {
            let credential = candidate.credential.as_str();
            match self.provider.probe_capacity(credential).await {
                Ok(snapshot) => {
                    let now = epoch_secs();
                    let account = self
                        .ledger
                        .record_capacity(credential, snapshot.count, now)?;
                    let limit = account.capacity_limit.min(snapshot.limit);
                    if snapshot.count < limit {
                        let account = self.ledger.mark_account_used(credential, now)?;
                        debug!(
                            account = %credential,
                            used = snapshot.count,
                            limit,
                            "account selected"
                        );
                        return Ok(Some(account));
                    }
                    debug!(
                        account = %credential,
                        used = snapshot.count,
                        limit,
                        "account at capacity, skipping"
                    );
                }
                Err(e) if e.is_unauthorized() => {
                    warn!(account = %credential, error = %e, "credential rejected, deactivating");
                    self.ledger
                        .deactivate_account(credential, &e.to_string(), epoch_secs())?;
                }
                Err(e) => {
                    // Transient (or otherwise inconclusive) probe: skip the
                    // candidate for this selection without deactivating.
                    warn!(account = %credential, error = %e, "capacity probe failed, skipping");
                    self.ledger
                        .record_account_failure(credential, &e.to_string(), epoch_secs())?;
                }
            }
        }

        info!("no account with spare capacity");
        Ok(None)
    }

    /// Record a capacity snapshot observed outside selection.
    pub fn record_capacity_snapshot(&self, credential: &str, used: u32) -> PoolResult<()> {
        self.ledger.record_capacity(credential, used, epoch_secs())?;
        Ok(())
    }

    /// Record a failed remote operation against an account.
    pub fn record_failure(&self, credential: &str, reason: &str) -> PoolResult<()> {
        self.ledger
            .record_account_failure(credential, reason, epoch_secs())?;
        Ok(())
    }

    /// Record a successful deployment under an account.
    pub fn record_success(&self, credential: &str) -> PoolResult<()> {
        self.ledger
            .record_account_success(credential, epoch_secs())?;
        Ok(())
    }

    /// Remove an account from the pool. The row is kept; only an
    /// explicit [`AccountPool::revalidate`] puts it back.
    pub fn deactivate(&self, credential: &str, reason: &str) -> PoolResult<()> {
        self.ledger
            .deactivate_account(credential, reason, epoch_secs())?;
        Ok(())
    }

    /// Operator-driven resurrection: re-probe the credential and, if the
    /// provider accepts it, reactivate the account with a fresh snapshot.
    pub async fn revalidate(&self, credential: &str) -> PoolResult<HostingAccount> {
        if self.ledger.get_account(credential)?.is_none() {
            return Err(PoolError::AccountNotFound(credential.to_string()));
        }
        match self.provider.probe_capacity(credential).await {
            Ok(snapshot) => {
                let now = epoch_secs();
                self.ledger.reactivate_account(credential, now)?;
                let account = self
                    .ledger
                    .record_capacity(credential, snapshot.count, now)?;
                info!(account = %credential, used = snapshot.count, "account re-validated");
                Ok(account)
            }
            Err(e) => {
                self.ledger
                    .record_account_failure(credential, &e.to_string(), epoch_secs())?;
                warn!(account = %credential, error = %e, "re-validation failed");
                Err(PoolError::Revalidation(e))
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
    use flotilla_provider::ProviderError;
    use flotilla_provider::testing::{FakeProvider, Op};

    fn setup() -> (Ledger, Arc<FakeProvider>) {
        (Ledger::open_in_memory().unwrap(), Arc::new(FakeProvider::new()))
    }

    fn add_account(ledger: &Ledger, provider: &FakeProvider, credential: &str, limit: u32) {
        ledger
            .put_account(&HostingAccount::new(credential, limit, 1000))
            .unwrap();
        provider.register_account(credential, limit);
    }

    #[tokio::test]
    async fn selects_account_below_limit() {
        let (ledger, provider) = setup();
        add_account(&ledger, &provider, "key-a", 98);
        provider.seed_resource("key-a", "one");
        provider.seed_resource("key-a", "two");

        let pool = AccountPool::new(ledger.clone(), provider.clone());
        let selected = pool.select_usable_account().await.unwrap().unwrap();

        assert_eq!(selected.credential, "key-a");
        // The snapshot was recorded on the row before hand-out.
        assert_eq!(selected.capacity_used, 2);
        assert!(selected.last_checked_at.is_some());
        assert!(selected.last_used_at.is_some());
    }

    #[tokio::test]
    async fn skips_at_limit_and_inactive_candidates() {
        let (ledger, provider) = setup();
        // A: spare capacity. B: at its limit. C: deactivated.
        add_account(&ledger, &provider, "key-a", 98);
        provider.seed_resource("key-a", "a-one");
        provider.seed_resource("key-a", "a-two");
        add_account(&ledger, &provider, "key-b", 99);
        for i in 0..99 {
            provider.seed_resource("key-b", &format!("b-{i}"));
        }
        add_account(&ledger, &provider, "key-c", 98);
        ledger.deactivate_account("key-c", "operator", 1000).unwrap();

        let pool = AccountPool::new(ledger.clone(), provider.clone());
        let selected = pool.select_usable_account().await.unwrap().unwrap();

        assert_eq!(selected.credential, "key-a");
        // C is never probed; A and B once each at most.
        let probes = provider
            .calls()
            .iter()
            .filter(|c| c.op == Op::ProbeCapacity)
            .count();
        assert!(probes <= 3);
        assert!(!provider.calls().iter().any(|c| c.credential == "key-c"));
    }

    #[tokio::test]
    async fn unauthorized_probe_deactivates_until_revalidated() {
        let (ledger, provider) = setup();
        add_account(&ledger, &provider, "key-a", 98);
        provider.set_unauthorized("key-a", true);

        let pool = AccountPool::new(ledger.clone(), provider.clone());
        assert!(pool.select_usable_account().await.unwrap().is_none());

        // Deactivated on the very next read, and no longer probed.
        let account = ledger.get_account("key-a").unwrap().unwrap();
        assert!(!account.active);
        assert!(account.error_message.is_some());

        let probes_before = provider.calls().len();
        assert!(pool.select_usable_account().await.unwrap().is_none());
        assert_eq!(provider.calls().len(), probes_before);

        // Operator fixes the credential and re-validates.
        provider.set_unauthorized("key-a", false);
        let account = pool.revalidate("key-a").await.unwrap();
        assert!(account.active);
        assert!(pool.select_usable_account().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn transient_probe_skips_without_deactivating() {
        let (ledger, provider) = setup();
        add_account(&ledger, &provider, "key-a", 98);
        provider.fail_next(
            Op::ProbeCapacity,
            "key-a",
            ProviderError::Transient("timed out".into()),
        );

        let pool = AccountPool::new(ledger.clone(), provider.clone());
        assert!(pool.select_usable_account().await.unwrap().is_none());

        let account = ledger.get_account("key-a").unwrap().unwrap();
        assert!(account.active);
        assert_eq!(account.consecutive_failures, 1);

        // Next selection probes again and succeeds.
        assert!(pool.select_usable_account().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_pool_returns_none() {
        let (ledger, provider) = setup();
        let pool = AccountPool::new(ledger, provider);
        assert!(pool.select_usable_account().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revalidate_unknown_account() {
        let (ledger, provider) = setup();
        let pool = AccountPool::new(ledger, provider);
        let result = pool.revalidate("nope").await;
        assert!(matches!(result, Err(PoolError::AccountNotFound(_))));
    }

    #[tokio::test]
    async fn revalidate_failure_records_and_keeps_inactive() {
        let (ledger, provider) = setup();
        add_account(&ledger, &provider, "key-a", 98);
        ledger.deactivate_account("key-a", "unauthorized", 1000).unwrap();
        provider.set_unauthorized("key-a", true);

        let pool = AccountPool::new(ledger.clone(), provider.clone());
        let result = pool.revalidate("key-a").await;
        assert!(matches!(result, Err(PoolError::Revalidation(_))));
        assert!(!ledger.get_account("key-a").unwrap().unwrap().active);
    }
}
