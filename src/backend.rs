//! Execution backends that carry out a remediation attempt.
//!
//! Two implementations share the [`ExecutionBackend`] contract: the
//! deterministic [`SimulatedBackend`] and the [`AgentBackend`], which drives a
//! remote tool-execution agent over a JSON-RPC session.

pub mod agent;
pub mod auth;
pub mod error;
pub mod metrics;
pub mod options;
pub mod outcome;
pub mod risk;
pub mod session;
pub mod simulated;

use crate::incident::Scenario;
use crate::remediation::policy::SecurityPolicy;
use futures::future::BoxFuture;

pub use agent::{AgentBackend, AgentSettings};
pub use error::{BackendError, BackendErrorKind};
pub use metrics::SessionMetricsSnapshot;
pub use options::AgentClientOptions;
pub use outcome::Outcome;
pub use risk::RiskLevel;
pub use session::AgentSessionClient;
pub use simulated::SimulatedBackend;

/// Everything a backend needs for one remediation attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub strategy_hint: String,
    pub incident_description: String,
    pub scenario: Scenario,
    pub policy: SecurityPolicy,
    pub trace_key: Option<String>,
}

pub trait ExecutionBackend: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    fn execute<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<Outcome, BackendError>>;

    /// Transport counters for backends that talk to a remote session.
    fn session_metrics(&self) -> Option<SessionMetricsSnapshot> {
        None
    }
}

/// Stand-in for a real backend that was never configured.
///
/// Every attempt fails permanently, so a runner with fallback enabled goes
/// straight to simulation without retrying.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBackend;

impl ExecutionBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn execute<'a>(
        &'a self,
        _request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<Outcome, BackendError>> {
        Box::pin(async {
            Err(BackendError::permanent(
                BackendErrorKind::Unavailable,
                "no agent endpoint configured",
            ))
        })
    }
}
