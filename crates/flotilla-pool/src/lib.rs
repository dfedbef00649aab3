//! flotilla-pool — selection and health tracking for hosting accounts.
//!
//! The pool hands out accounts with confirmed spare capacity. Selection
//! scans the active accounts in randomized order and probes each
//! candidate against the provider — the remote count is authoritative,
//! the cached counter on the row is informational only.
//!
//! An `Unauthorized` probe permanently removes the account from the
//! pool (until an operator re-validates it); a transient error skips
//! the candidate for this call only.

pub mod error;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use pool::AccountPool;
