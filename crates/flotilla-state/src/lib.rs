//! flotilla-state — embedded ledger for the flotilla control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides durable records for
//! hosting accounts, deployments, and the maintenance log.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Deployments are keyed by a store-assigned zero-padded sequence id, so
//! key order equals creation order and the reconciler can page sweeps
//! without a secondary index.
//!
//! Deployment status changes go through [`Ledger::update_status`], which
//! enforces the legal transition set inside a single write transaction —
//! a transition from a row that is no longer in the expected state is
//! rejected, never overwritten.
//!
//! The `Ledger` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::Ledger;
pub use types::*;
