use super::policy::{PolicyViolation, SecurityPolicy};
use super::retry::{RetryDisposition, RetryPolicy, DEFAULT_BACKOFF_UNIT, DEFAULT_MAX_RETRIES};
use crate::backend::{
    AgentBackend, AgentSessionClient, AgentSettings, BackendError, ExecutionBackend,
    ExecutionRequest, Outcome, SessionMetricsSnapshot, SimulatedBackend, UnavailableBackend,
};
use crate::incident::Incident;
use crate::runtime::config::DispatchConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Which backend a runner drives. Chosen once when the runner is built.
#[derive(Clone)]
pub enum BackendMode {
    Simulated,
    Real(Arc<dyn ExecutionBackend>),
}

impl BackendMode {
    pub fn is_simulated(&self) -> bool {
        matches!(self, BackendMode::Simulated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    pub max_retries: usize,
    pub backoff_unit: Duration,
    pub allow_fallback: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            allow_fallback: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("remediation failed after {attempts} attempt(s): {source}")]
    Failed {
        transient: bool,
        attempts: usize,
        #[source]
        source: BackendError,
    },
    #[error("remediation rejected after {attempts} attempt(s): {violation}")]
    PolicyViolation {
        attempts: usize,
        #[source]
        violation: PolicyViolation,
    },
}

impl RemediationError {
    pub fn attempts(&self) -> usize {
        match self {
            RemediationError::Failed { attempts, .. }
            | RemediationError::PolicyViolation { attempts, .. } => *attempts,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemediationError::Failed { transient: true, .. })
    }

    /// Underlying cause, without the attempt bookkeeping.
    pub fn reason(&self) -> String {
        match self {
            RemediationError::Failed { source, .. } => source.to_string(),
            RemediationError::PolicyViolation { violation, .. } => violation.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RemediationRequest<'a> {
    pub strategy_hint: &'a str,
    pub incident: &'a Incident,
    pub policy: &'a SecurityPolicy,
    pub dry_run: bool,
    pub trace_key: Option<&'a str>,
}

enum AttemptState {
    Attempting { attempt: usize },
    Retrying { attempt: usize, error: BackendError },
    Fallback { cause: RemediationError },
    Done(Outcome),
    Failed(RemediationError),
}

pub struct RemediationRunner {
    mode: BackendMode,
    simulator: SimulatedBackend,
    retry: RetryPolicy,
    allow_fallback: bool,
    telemetry: Option<Arc<Telemetry>>,
}

impl RemediationRunner {
    pub fn new(mode: BackendMode, simulator: SimulatedBackend, options: RunnerOptions) -> Self {
        Self {
            mode,
            simulator,
            retry: RetryPolicy::new(options.max_retries, options.backoff_unit),
            allow_fallback: options.allow_fallback,
            telemetry: None,
        }
    }

    /// Builds the runner a dispatch configuration asks for.
    ///
    /// Simulate mode never touches the agent. Real mode without an agent endpoint
    /// is only accepted by config validation when fallback is allowed, in which
    /// case every attempt fails permanently and falls back to simulation.
    pub fn from_config(config: &DispatchConfig) -> Result<Self> {
        let simulator = SimulatedBackend::new(config.target_url());
        let mode = if config.simulate() {
            BackendMode::Simulated
        } else {
            match config.agent_url() {
                Some(url) => {
                    let client = AgentSessionClient::new(url, config.agent_api_key())
                        .with_context(|| format!("failed to build agent client for {url}"))?;
                    let settings = AgentSettings {
                        working_dir: config.agent_working_dir().to_owned(),
                        target_url: config.target_url().to_owned(),
                        target_container: config.target_container().map(str::to_owned),
                        expected_image: config.expected_image().map(str::to_owned),
                        run_timeout: config.run_timeout(),
                    };
                    BackendMode::Real(Arc::new(AgentBackend::new(client, settings)))
                }
                None => {
                    tracing::warn!("no agent endpoint configured; every incident will fall back to simulation");
                    BackendMode::Real(Arc::new(UnavailableBackend))
                }
            }
        };
        Ok(Self::new(mode, simulator, config.runner_options()))
    }

    /// Runner that only ever simulates.
    pub fn simulated(simulator: SimulatedBackend) -> Self {
        Self::new(BackendMode::Simulated, simulator, RunnerOptions::default())
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn mode(&self) -> &BackendMode {
        &self.mode
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Cumulative agent session counters since the runner was built, if it drives one.
    pub fn session_metrics(&self) -> Option<SessionMetricsSnapshot> {
        match &self.mode {
            BackendMode::Real(backend) => backend.session_metrics(),
            BackendMode::Simulated => None,
        }
    }

    pub async fn remediate(
        &self,
        request: RemediationRequest<'_>,
    ) -> Result<Outcome, RemediationError> {
        let backend = match &self.mode {
            BackendMode::Real(backend) if !request.dry_run => backend.clone(),
            _ => {
                return Ok(self
                    .simulator
                    .simulate(request.strategy_hint, request.incident.scenario));
            }
        };

        let exec_request = ExecutionRequest {
            strategy_hint: request.strategy_hint.to_owned(),
            incident_description: request.incident.description(),
            scenario: request.incident.scenario,
            policy: request.policy.clone(),
            trace_key: request.trace_key.map(str::to_owned),
        };

        let mut state = AttemptState::Attempting { attempt: 1 };
        loop {
            state = match state {
                AttemptState::Attempting { attempt } => {
                    match backend.execute(&exec_request).await {
                        Ok(mut outcome) => match request.policy.enforce(&mut outcome) {
                            Ok(()) => AttemptState::Done(outcome),
                            Err(violation) => {
                                if let Some(telemetry) = &self.telemetry {
                                    telemetry.record_policy_violation();
                                }
                                self.give_up(RemediationError::PolicyViolation {
                                    attempts: attempt,
                                    violation,
                                })
                            }
                        },
                        Err(error) => match self.retry.classify(attempt, &error) {
                            RetryDisposition::Retry => AttemptState::Retrying { attempt, error },
                            RetryDisposition::Abort => self.give_up(RemediationError::Failed {
                                transient: error.is_transient(),
                                attempts: attempt,
                                source: error,
                            }),
                        },
                    }
                }
                AttemptState::Retrying { attempt, error } => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        incident = %request.incident.id,
                        backend = backend.name(),
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient backend failure; retrying"
                    );
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_backend_retry();
                    }
                    sleep(delay).await;
                    AttemptState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                AttemptState::Fallback { cause } => {
                    let reason = cause.reason();
                    tracing::warn!(
                        incident = %request.incident.id,
                        attempts = cause.attempts(),
                        reason = %reason,
                        "falling back to simulation"
                    );
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_fallback();
                    }
                    let outcome = self
                        .simulator
                        .simulate(request.strategy_hint, request.incident.scenario)
                        .into_fallback(reason);
                    AttemptState::Done(outcome)
                }
                AttemptState::Done(outcome) => return Ok(outcome),
                AttemptState::Failed(error) => return Err(error),
            };
        }
    }

    fn give_up(&self, error: RemediationError) -> AttemptState {
        if self.allow_fallback {
            AttemptState::Fallback { cause: error }
        } else {
            AttemptState::Failed(error)
        }
    }
}
