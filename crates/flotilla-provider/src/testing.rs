//! Scripted in-memory provider for tests.
//!
//! `FakeProvider` models a provider org: resources are globally
//! name-unique, any registered credential may delete any resource, and
//! per-operation failures can be injected keyed by credential or by
//! resource name. Every call is appended to a log so tests can assert
//! interaction counts (e.g. "rollback issued exactly one delete").

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{
    CapacitySnapshot, Liveness, ProviderApi, ProviderError, ProviderResult, ResourceHandle,
};

/// Provider operations, for call-log assertions and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    SetParameters,
    TriggerBuild,
    ProbeCapacity,
    ProbeLiveness,
    Delete,
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub credential: String,
    /// Resource name, for operations that target one.
    pub name: Option<String>,
}

#[derive(Default)]
struct FakeAccount {
    limit: u32,
    unauthorized: bool,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, FakeAccount>,
    /// Global resource namespace: name -> owning credential.
    resources: HashMap<String, String>,
    /// Liveness overrides; resources default to active.
    inactive: HashMap<String, bool>,
    /// Scripted outcomes; `Some(err)` fails the call, `None` lets it
    /// through (used to reach the Nth call of an operation).
    fail_by_credential: HashMap<(Op, String), VecDeque<Option<ProviderError>>>,
    fail_by_name: HashMap<(Op, String), VecDeque<Option<ProviderError>>>,
    calls: Vec<Call>,
    build_seq: u64,
}

/// In-memory [`ProviderApi`] with failure injection and a call log.
#[derive(Default)]
pub struct FakeProvider {
    inner: Mutex<Inner>,
    /// Optional latency applied to every call.
    delay: Mutex<Option<Duration>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential with a provider-side limit.
    pub fn register_account(&self, credential: &str, limit: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.accounts.insert(
            credential.to_string(),
            FakeAccount {
                limit,
                unauthorized: false,
            },
        );
    }

    /// Seed an existing resource owned by a credential.
    pub fn seed_resource(&self, credential: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .resources
            .insert(name.to_string(), credential.to_string());
    }

    /// Make every call with this credential fail `Unauthorized`.
    pub fn set_unauthorized(&self, credential: &str, unauthorized: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(account) = inner.accounts.get_mut(credential) {
            account.unauthorized = unauthorized;
        }
    }

    /// Mark a resource as no longer running.
    pub fn set_inactive(&self, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.inactive.insert(name.to_string(), true);
    }

    /// Queue a one-shot failure for the next `op` call using `credential`.
    pub fn fail_next(&self, op: Op, credential: &str, error: ProviderError) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fail_by_credential
            .entry((op, credential.to_string()))
            .or_default()
            .push_back(Some(error));
    }

    /// Let the next `op` call using `credential` through untouched.
    /// Combined with [`FakeProvider::fail_next`] this scripts "the Nth
    /// call fails".
    pub fn pass_next(&self, op: Op, credential: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fail_by_credential
            .entry((op, credential.to_string()))
            .or_default()
            .push_back(None);
    }

    /// Queue a one-shot failure for the next `op` call targeting `name`.
    pub fn fail_next_for_name(&self, op: Op, name: &str, error: ProviderError) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fail_by_name
            .entry((op, name.to_string()))
            .or_default()
            .push_back(Some(error));
    }

    /// Apply a fixed latency to every call (reentrancy tests).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Number of logged calls matching an operation and resource name.
    pub fn count_calls(&self, op: Op, name: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.op == op && c.name.as_deref() == Some(name))
            .count()
    }

    /// Whether a resource currently exists, and under which credential.
    pub fn resource_owner(&self, name: &str) -> Option<String> {
        self.inner.lock().unwrap().resources.get(name).cloned()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Common per-call bookkeeping: log, auth check, injected failures.
    fn begin(&self, op: Op, credential: &str, name: Option<&str>) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call {
            op,
            credential: credential.to_string(),
            name: name.map(str::to_string),
        });

        if let Some(name) = name
            && let Some(queue) = inner.fail_by_name.get_mut(&(op, name.to_string()))
            && let Some(outcome) = queue.pop_front()
            && let Some(error) = outcome
        {
            return Err(error);
        }
        if let Some(queue) = inner
            .fail_by_credential
            .get_mut(&(op, credential.to_string()))
            && let Some(outcome) = queue.pop_front()
            && let Some(error) = outcome
        {
            return Err(error);
        }

        match inner.accounts.get(credential) {
            Some(account) if account.unauthorized => Err(ProviderError::Unauthorized(format!(
                "credential {credential} rejected"
            ))),
            Some(_) => Ok(()),
            None => Err(ProviderError::Unauthorized(format!(
                "unknown credential {credential}"
            ))),
        }
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn create_resource(
        &self,
        credential: &str,
        name: &str,
    ) -> ProviderResult<ResourceHandle> {
        self.pause().await;
        self.begin(Op::Create, credential, Some(name))?;
        let mut inner = self.inner.lock().unwrap();
        if inner.resources.contains_key(name) {
            return Err(ProviderError::Conflict(format!("name {name} taken")));
        }
        inner
            .resources
            .insert(name.to_string(), credential.to_string());
        Ok(ResourceHandle {
            name: name.to_string(),
            url: Some(format!("https://{name}.hosting.example")),
        })
    }

    async fn set_parameters(
        &self,
        credential: &str,
        name: &str,
        _parameters: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        self.pause().await;
        self.begin(Op::SetParameters, credential, Some(name))?;
        let inner = self.inner.lock().unwrap();
        if !inner.resources.contains_key(name) {
            return Err(ProviderError::NotFound(format!("resource {name}")));
        }
        Ok(())
    }

    async fn trigger_build(
        &self,
        credential: &str,
        name: &str,
        _source_ref: &str,
    ) -> ProviderResult<String> {
        self.pause().await;
        self.begin(Op::TriggerBuild, credential, Some(name))?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.resources.contains_key(name) {
            return Err(ProviderError::NotFound(format!("resource {name}")));
        }
        inner.build_seq += 1;
        Ok(format!("build-{}", inner.build_seq))
    }

    async fn probe_capacity(&self, credential: &str) -> ProviderResult<CapacitySnapshot> {
        self.pause().await;
        self.begin(Op::ProbeCapacity, credential, None)?;
        let inner = self.inner.lock().unwrap();
        let count = inner
            .resources
            .values()
            .filter(|owner| owner.as_str() == credential)
            .count() as u32;
        let limit = inner
            .accounts
            .get(credential)
            .map(|a| a.limit)
            .unwrap_or_default();
        Ok(CapacitySnapshot { count, limit })
    }

    async fn probe_liveness(&self, credential: &str, name: &str) -> ProviderResult<Liveness> {
        self.pause().await;
        self.begin(Op::ProbeLiveness, credential, Some(name))?;
        let inner = self.inner.lock().unwrap();
        if !inner.resources.contains_key(name) {
            return Ok(Liveness { active: false });
        }
        Ok(Liveness {
            active: !inner.inactive.get(name).copied().unwrap_or(false),
        })
    }

    async fn delete_resource(&self, credential: &str, name: &str) -> ProviderResult<()> {
        self.pause().await;
        self.begin(Op::Delete, credential, Some(name))?;
        let mut inner = self.inner.lock().unwrap();
        // Any valid credential in the org may delete a named resource.
        match inner.resources.remove(name) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(format!("resource {name}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_conflict() {
        let provider = FakeProvider::new();
        provider.register_account("key-a", 98);
        provider.register_account("key-b", 98);

        provider.create_resource("key-a", "foo").await.unwrap();
        let err = provider.create_resource("key-b", "foo").await.unwrap_err();
        assert!(matches!(err, ProviderError::Conflict(_)));
    }

    #[tokio::test]
    async fn capacity_counts_per_credential() {
        let provider = FakeProvider::new();
        provider.register_account("key-a", 98);
        provider.register_account("key-b", 98);
        provider.seed_resource("key-a", "one");
        provider.seed_resource("key-a", "two");
        provider.seed_resource("key-b", "three");

        let snap = provider.probe_capacity("key-a").await.unwrap();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.limit, 98);
    }

    #[tokio::test]
    async fn unauthorized_credential_fails_every_call() {
        let provider = FakeProvider::new();
        provider.register_account("key-a", 98);
        provider.set_unauthorized("key-a", true);

        let err = provider.probe_capacity("key-a").await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn injected_failures_are_one_shot() {
        let provider = FakeProvider::new();
        provider.register_account("key-a", 98);
        provider.fail_next(
            Op::ProbeCapacity,
            "key-a",
            ProviderError::Transient("flaky".into()),
        );

        assert!(provider.probe_capacity("key-a").await.unwrap_err().is_transient());
        assert!(provider.probe_capacity("key-a").await.is_ok());
    }

    #[tokio::test]
    async fn cross_account_delete() {
        let provider = FakeProvider::new();
        provider.register_account("key-a", 98);
        provider.register_account("key-b", 98);
        provider.seed_resource("key-a", "foo");

        provider.delete_resource("key-b", "foo").await.unwrap();
        assert!(provider.resource_owner("foo").is_none());

        let err = provider.delete_resource("key-b", "foo").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn call_log_records_operations() {
        let provider = FakeProvider::new();
        provider.register_account("key-a", 98);
        provider.create_resource("key-a", "foo").await.unwrap();
        let _ = provider.delete_resource("key-a", "foo").await;

        assert_eq!(provider.count_calls(Op::Create, "foo"), 1);
        assert_eq!(provider.count_calls(Op::Delete, "foo"), 1);
        assert_eq!(provider.calls().len(), 2);
    }
}
