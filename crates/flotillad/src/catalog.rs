//! Static workload catalog from the daemon config.

use std::collections::HashMap;

use async_trait::async_trait;

use flotilla_reconciler::{CatalogError, WorkloadCatalog};
use flotilla_state::WorkloadId;

/// Per-workload recurring costs fixed at startup.
pub struct StaticCatalog {
    costs: HashMap<WorkloadId, u64>,
}

impl StaticCatalog {
    pub fn new(costs: HashMap<WorkloadId, u64>) -> Self {
        Self { costs }
    }
}

#[async_trait]
impl WorkloadCatalog for StaticCatalog {
    async fn recurring_cost(&self, workload_id: WorkloadId) -> Result<u64, CatalogError> {
        self.costs
            .get(&workload_id)
            .copied()
            .ok_or(CatalogError::UnknownWorkload(workload_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_and_unknown_workloads() {
        let catalog = StaticCatalog::new(HashMap::from([(42, 25)]));

        assert_eq!(catalog.recurring_cost(42).await.unwrap(), 25);
        assert_eq!(
            catalog.recurring_cost(7).await,
            Err(CatalogError::UnknownWorkload(7))
        );
    }
}
