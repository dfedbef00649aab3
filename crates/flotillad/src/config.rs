//! Daemon configuration, loaded from a TOML file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use flotilla_state::WorkloadId;

/// Top-level daemon configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Directory for the ledger database.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub provider: ProviderSection,
    pub billing: BillingSection,
    #[serde(default)]
    pub reconciler: ReconcilerSection,
    /// Static workload catalog: recurring cost per workload id.
    #[serde(default)]
    pub workloads: Vec<WorkloadEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Provider-side resource ceiling per credential.
    pub resource_limit: u32,
    /// Suffix appended to requested names to form remote names.
    pub name_suffix: String,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.hosting.example".to_string(),
            request_timeout_secs: 10,
            resource_limit: 99,
            name_suffix: "-fl".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BillingSection {
    pub base_url: String,
    #[serde(default = "default_billing_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_billing_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReconcilerSection {
    pub sweep_interval_secs: u64,
    pub staleness_window_secs: u64,
    pub billing_interval_secs: u64,
    pub page_size: usize,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            staleness_window_secs: 3600,
            billing_interval_secs: 24 * 3600,
            page_size: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkloadEntry {
    pub id: WorkloadId,
    pub recurring_cost: u64,
}

impl Config {
    /// Load and parse the config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn reconciler_config(&self) -> flotilla_reconciler::ReconcilerConfig {
        flotilla_reconciler::ReconcilerConfig {
            sweep_interval: Duration::from_secs(self.reconciler.sweep_interval_secs),
            staleness_window: Duration::from_secs(self.reconciler.staleness_window_secs),
            billing_interval: Duration::from_secs(self.reconciler.billing_interval_secs),
            page_size: self.reconciler.page_size,
        }
    }

    pub fn provider_config(&self) -> flotilla_provider::HttpProviderConfig {
        flotilla_provider::HttpProviderConfig {
            base_url: self.provider.base_url.clone(),
            timeout: Duration::from_secs(self.provider.request_timeout_secs),
            resource_limit: self.provider.resource_limit,
        }
    }

    pub fn workload_costs(&self) -> HashMap<WorkloadId, u64> {
        self.workloads
            .iter()
            .map(|w| (w.id, w.recurring_cost))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let raw = r#"
            data_dir = "/var/lib/flotilla"

            [provider]
            base_url = "https://api.hosting.example"
            request_timeout_secs = 5
            resource_limit = 98
            name_suffix = "-fl"

            [billing]
            base_url = "http://billing.internal:9090"

            [reconciler]
            sweep_interval_secs = 120
            staleness_window_secs = 1800
            billing_interval_secs = 86400
            page_size = 25

            [[workloads]]
            id = 42
            recurring_cost = 25

            [[workloads]]
            id = 43
            recurring_cost = 40
        "#;
        let config: Config = toml::from_str(raw).unwrap();

        assert_eq!(config.provider.resource_limit, 98);
        assert_eq!(config.billing.request_timeout_secs, 10);
        assert_eq!(config.reconciler_config().page_size, 25);
        assert_eq!(config.workload_costs()[&43], 40);
    }

    #[test]
    fn provider_and_reconciler_sections_are_optional() {
        let raw = r#"
            data_dir = "/tmp/flotilla"

            [billing]
            base_url = "http://billing.internal:9090"
        "#;
        let config: Config = toml::from_str(raw).unwrap();

        assert_eq!(config.provider.name_suffix, "-fl");
        assert_eq!(config.reconciler.sweep_interval_secs, 300);
        assert!(config.workload_costs().is_empty());
    }
}
