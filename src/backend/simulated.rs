//! Deterministic simulation backend.
//!
//! Produces a scripted shell plan per scenario. A strategy hint that names the
//! concrete artefacts of the scenario gets the short optimized plan, anything
//! else gets the exploratory baseline plan.

use super::error::BackendError;
use super::outcome::Outcome;
use super::risk::RiskLevel;
use super::{ExecutionBackend, ExecutionRequest};
use crate::incident::Scenario;
use futures::future::BoxFuture;

pub const DEFAULT_TARGET_URL: &str = "http://127.0.0.1:15000";

const SIMULATED_TOOL: &str = "terminal";

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    target_url: String,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_URL)
    }
}

impl SimulatedBackend {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
        }
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Runs the scripted plan for `scenario`. Never fails.
    pub fn simulate(&self, strategy_hint: &str, scenario: Scenario) -> Outcome {
        let optimized = is_optimized_hint(strategy_hint, scenario);
        let events = self.plan(scenario, optimized);
        let tool_actions = vec![SIMULATED_TOOL.to_owned(); events.len()];
        let security_risks = vec![RiskLevel::Low; events.len()];
        let label = if optimized { "optimized" } else { "baseline" };

        Outcome {
            service_up: true,
            step_count: events.len(),
            tool_actions,
            events,
            max_security_risk_seen: RiskLevel::max_of(&security_risks),
            security_risks,
            confirmation_required: false,
            fallback_used: false,
            fallback_reason: None,
            raw_output: format!("Simulation run ({label}): diagnosed {scenario} and restored service."),
        }
    }

    fn plan(&self, scenario: Scenario, optimized: bool) -> Vec<String> {
        let probe = format!("curl -i {}", self.target_url);
        let steps: Vec<String> = match (scenario, optimized) {
            (Scenario::StaleLockfile, true) => vec![
                "ls -la /tmp | grep service.lock".into(),
                "rm -f /tmp/service.lock".into(),
                probe,
            ],
            (Scenario::StaleLockfile, false) => vec![
                probe.clone(),
                "cat /app/app.py".into(),
                "pip list".into(),
                "ls -la /tmp".into(),
                "rm -f /tmp/service.lock".into(),
                probe,
            ],
            (Scenario::BadEnvConfig, true) => vec![
                "printenv | grep REQUIRED_API_KEY".into(),
                "export REQUIRED_API_KEY=demo-key".into(),
                probe,
            ],
            (Scenario::BadEnvConfig, false) => vec![
                probe.clone(),
                "cat /app/app.py".into(),
                "printenv | sort".into(),
                "export REQUIRED_API_KEY=demo-key".into(),
                probe,
            ],
            (Scenario::ReadinessProbeFail, true) => vec![
                "ls -la /tmp | grep ready.flag".into(),
                "touch /tmp/ready.flag".into(),
                probe,
            ],
            (Scenario::ReadinessProbeFail, false) => vec![
                probe.clone(),
                "cat /app/app.py".into(),
                "ls -la /tmp".into(),
                "touch /tmp/ready.flag".into(),
                probe,
            ],
            (Scenario::PortMismatch, true) => vec![
                "ss -lntp | grep 5001".into(),
                "socat TCP-LISTEN:5000,fork TCP:127.0.0.1:5001".into(),
                probe,
            ],
            (Scenario::PortMismatch, false) => vec![
                probe.clone(),
                "ss -lntp".into(),
                "curl -i localhost:5001".into(),
                "socat TCP-LISTEN:5000,fork TCP:127.0.0.1:5001".into(),
                probe,
            ],
        };
        steps
    }
}

impl ExecutionBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn execute<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<Outcome, BackendError>> {
        Box::pin(async move { Ok(self.simulate(&request.strategy_hint, request.scenario)) })
    }
}

/// Whether `hint` points directly at the artefacts involved in `scenario`.
pub fn is_optimized_hint(hint: &str, scenario: Scenario) -> bool {
    let hint = hint.to_ascii_lowercase();
    let has = |needle: &str| hint.contains(needle);
    match scenario {
        Scenario::StaleLockfile => (has("lockfile") || has("service.lock")) && has("/tmp"),
        Scenario::BadEnvConfig => has("required_api_key") || (has("env") && has("config")),
        Scenario::ReadinessProbeFail => has("ready.flag") || has("readiness"),
        Scenario::PortMismatch => has("port") && (has("5000") || has("5001")),
    }
}
