//! Real execution backend driving a remote agent session.

use super::error::{BackendError, BackendErrorKind};
use super::outcome::Outcome;
use super::risk::RiskLevel;
use super::session::{AgentSessionClient, EventKind, SessionEvent, SessionState};
use super::{ExecutionBackend, ExecutionRequest, SessionMetricsSnapshot};
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::time::{sleep, timeout};

pub const DEFAULT_WORKING_DIR: &str = "/workspace";
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(180);

const COUNTED_TOOLS: [&str; 2] = ["terminal", "file_editor"];
const RAW_OUTPUT_TAIL_EVENTS: usize = 6;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub working_dir: String,
    pub target_url: String,
    pub target_container: Option<String>,
    pub expected_image: Option<String>,
    /// Wall-clock bound for one whole attempt, session setup included.
    pub run_timeout: Duration,
}

pub struct AgentBackend {
    client: AgentSessionClient,
    settings: AgentSettings,
}

impl AgentBackend {
    pub fn new(client: AgentSessionClient, settings: AgentSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn metrics(&self) -> SessionMetricsSnapshot {
        self.client.metrics()
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<Outcome, BackendError> {
        let task = build_task(request, &self.settings);
        match timeout(self.settings.run_timeout, self.drive(&task)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::classify(
                BackendErrorKind::Timeout,
                format!("agent run timed out after {:?}", self.settings.run_timeout),
            )),
        }
    }

    async fn drive(&self, task: &str) -> Result<Outcome, BackendError> {
        let session_id = self.client.open(&self.settings.working_dir).await?;
        tracing::debug!(session = %session_id, endpoint = self.client.endpoint(), "agent session opened");

        let result = self.converse(&session_id, task).await;

        if let Err(err) = self.client.close(&session_id).await {
            tracing::warn!(session = %session_id, error = %err, "failed to close agent session");
        }
        result
    }

    async fn converse(&self, session_id: &str, task: &str) -> Result<Outcome, BackendError> {
        self.client.send_message(session_id, task).await?;
        self.client.start_run(session_id).await?;

        let poll_interval = self.client.options().poll_interval;
        loop {
            let status = self.client.status(session_id).await?;
            match status.state {
                SessionState::Finished => break,
                SessionState::Error => {
                    let detail = status
                        .detail
                        .unwrap_or_else(|| "agent reported an error".to_owned());
                    return Err(BackendError::classify(BackendErrorKind::Session, detail));
                }
                SessionState::Idle | SessionState::Running => sleep(poll_interval).await,
            }
        }

        let events = self.client.events(session_id).await?;
        extract_outcome(&events)
    }
}

impl ExecutionBackend for AgentBackend {
    fn name(&self) -> &'static str {
        "agent"
    }

    fn execute<'a>(
        &'a self,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<Outcome, BackendError>> {
        Box::pin(self.run(request))
    }

    fn session_metrics(&self) -> Option<SessionMetricsSnapshot> {
        Some(self.metrics())
    }
}

/// Composes the instruction text sent to the agent.
pub fn build_task(request: &ExecutionRequest, settings: &AgentSettings) -> String {
    let mut target = format!("Target service URL: {}", settings.target_url);
    if let Some(container) = &settings.target_container {
        target.push_str(&format!(
            "\nTarget container: {container}. Repair it in place; do not recreate, rename or replace the container"
        ));
        if let Some(image) = &settings.expected_image {
            target.push_str(&format!(" and keep it running image {image}"));
        }
        target.push('.');
    }

    let trace = request
        .trace_key
        .as_deref()
        .map(|key| format!("\nTrace key: {key}"))
        .unwrap_or_default();

    format!(
        "You are an on-call SRE agent. Diagnose and repair the failing service with the fewest safe commands.\n\
         Runbook hint: {hint}\n\
         {target}\n\
         Do not take any action whose security risk exceeds {ceiling}.\n\
         Done when: an external curl to {url} returns JSON containing status='ok' and scenario='{scenario}'.\n\
         Scenario: {scenario}\n\
         Incident: {description}{trace}",
        hint = request.strategy_hint,
        ceiling = request.policy.max_security_risk,
        url = settings.target_url,
        scenario = request.scenario,
        description = request.incident_description,
    )
}

/// Reduces a finished session's event log to an [`Outcome`].
///
/// Only `terminal` and `file_editor` actions count as remediation steps; a run
/// without any of them is a permanent failure.
pub fn extract_outcome(events: &[SessionEvent]) -> Result<Outcome, BackendError> {
    let mut tool_actions = Vec::new();
    let mut security_risks = Vec::new();
    let mut commands = Vec::new();

    for event in events.iter().filter(|event| event.kind == EventKind::Action) {
        let Some(tool) = event.tool_name.as_deref() else {
            continue;
        };
        if !COUNTED_TOOLS.contains(&tool) {
            continue;
        }
        tool_actions.push(tool.to_owned());
        security_risks.push(RiskLevel::parse_lenient(
            event.security_risk.as_deref().unwrap_or_default(),
        ));
        commands.push(event.text.clone());
    }

    if tool_actions.is_empty() {
        return Err(BackendError::permanent(
            BackendErrorKind::NoToolActions,
            "agent run completed without terminal or file_editor tool actions",
        ));
    }

    let raw_output = events
        .iter()
        .rev()
        .find(|event| event.kind == EventKind::Observation && !event.text.trim().is_empty())
        .map(|event| event.text.clone())
        .unwrap_or_else(|| {
            let skip = events.len().saturating_sub(RAW_OUTPUT_TAIL_EVENTS);
            events[skip..]
                .iter()
                .map(|event| event.text.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        });

    Ok(Outcome {
        // The agent cannot vouch for the service; verification decides.
        service_up: false,
        step_count: tool_actions.len().max(1),
        tool_actions,
        events: commands,
        max_security_risk_seen: RiskLevel::max_of(&security_risks),
        security_risks,
        confirmation_required: false,
        fallback_used: false,
        fallback_reason: None,
        raw_output,
    })
}
