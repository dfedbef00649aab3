//! flotilla-provider — the remote hosting-provider interface.
//!
//! Every remote call the control plane makes goes through the
//! [`ProviderApi`] trait: resource creation, parameter configuration,
//! build triggering, capacity and liveness probes, and deletion.
//!
//! # Error classification
//!
//! Provider calls never surface raw transport errors. Each operation
//! returns a [`ProviderError`] that separates permanent conditions
//! (`Unauthorized`, `Conflict`, `NotFound`) from `Transient` ones
//! (timeouts, connection failures, 5xx). Callers decide policy from the
//! classification: the account pool deactivates on `Unauthorized` but
//! only skips on `Transient`; the provisioning workflow rolls back on
//! either.
//!
//! The concrete [`HttpProvider`] speaks a JSON REST dialect with bearer
//! credentials and a per-request timeout. Tests use
//! [`testing::FakeProvider`] instead.

pub mod api;
pub mod http;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{CapacitySnapshot, Liveness, ProviderApi, ProviderError, ProviderResult, ResourceHandle};
pub use http::{HttpProvider, HttpProviderConfig};
