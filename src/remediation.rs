//! Remediation runner: retries the configured backend, enforces the security
//! policy, and falls back to simulation when the caller allows it.

pub mod policy;
pub mod retry;
pub mod runner;

pub use policy::{PolicyViolation, SecurityPolicy};
pub use retry::{retry_delay, RetryPolicy};
pub use runner::{
    BackendMode, RemediationError, RemediationRequest, RemediationRunner, RunnerOptions,
};
