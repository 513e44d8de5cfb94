pub mod backend;
pub mod dispatch;
pub mod incident;
pub mod remediation;
pub mod runtime;
pub mod strategy;
pub mod trace;
pub mod verify;

pub use backend::{
    AgentBackend, AgentSessionClient, BackendError, BackendErrorKind, ExecutionBackend,
    ExecutionRequest, Outcome, RiskLevel, SimulatedBackend,
};
pub use dispatch::{
    DispatchReport, DispatchSummary, Dispatcher, DispatcherSnapshot, RunRecord, RunStatus,
};
pub use incident::{generate, Incident, IncidentGenerator, Scenario, Severity};
pub use remediation::{
    BackendMode, PolicyViolation, RemediationError, RemediationRequest, RemediationRunner,
    RunnerOptions, SecurityPolicy,
};
pub use runtime::config::{DispatchConfig, DispatchConfigBuilder, DispatchConfigParams, DispatchMode};
pub use runtime::supervisor::FanoutSupervisor;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use strategy::{StrategyKind, StrategySource};
pub use trace::{JsonlTraceSink, MemoryTraceSink, NullTraceSink, TraceSink};
pub use verify::{StabilityVerifier, VerificationResult, VerificationSettings};
