//! redb table definitions for the flotilla ledger.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types), except `meta` which holds raw `u64` sequence counters.

use redb::TableDefinition;

/// Hosting accounts keyed by `{credential}`.
pub const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosting_accounts");

/// Deployments keyed by the zero-padded sequence id, so iteration order
/// is creation order.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Maintenance log keyed by `{deployment_id}:{entry_seq}`.
pub const MAINTENANCE_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("maintenance_log");

/// Sequence counters (`deployment_seq`, `maintenance_seq`).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
