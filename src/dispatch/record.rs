use crate::backend::{Outcome, RiskLevel, SessionMetricsSnapshot};
use crate::incident::{Incident, Scenario, Severity};
use crate::verify::VerificationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Lifecycle of a dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trace record emitted exactly once per completed incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub trace_key: String,
    pub run_id: String,
    pub incident_id: String,
    pub scenario: Scenario,
    pub severity: Severity,
    /// When the incident was generated; `completed_at - created_at` includes queue wait.
    pub created_at: DateTime<Utc>,
    pub worker_id: usize,
    pub latency_s: f64,
    pub service_up: bool,
    /// At least 1 for records built from an outcome; 0 only on error records.
    pub step_count: usize,
    pub tool_actions: Vec<String>,
    pub security_risks: Vec<RiskLevel>,
    pub max_security_risk_seen: RiskLevel,
    pub confirmation_required: bool,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
    pub raw_output: String,
    pub verification: Option<VerificationResult>,
    /// Set when the incident ended in an error instead of an outcome.
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

pub(crate) struct RecordContext<'a> {
    pub incident: &'a Incident,
    pub run_id: &'a str,
    pub trace_key: &'a str,
    pub worker_id: usize,
    pub latency: Duration,
}

impl RunRecord {
    pub(crate) fn from_outcome(
        ctx: RecordContext<'_>,
        outcome: Outcome,
        verification: Option<VerificationResult>,
    ) -> Self {
        Self {
            trace_key: ctx.trace_key.to_owned(),
            run_id: ctx.run_id.to_owned(),
            incident_id: ctx.incident.id.clone(),
            scenario: ctx.incident.scenario,
            severity: ctx.incident.severity,
            created_at: ctx.incident.created_at,
            worker_id: ctx.worker_id,
            latency_s: ctx.latency.as_secs_f64(),
            service_up: outcome.service_up,
            step_count: outcome.step_count,
            tool_actions: outcome.tool_actions,
            security_risks: outcome.security_risks,
            max_security_risk_seen: outcome.max_security_risk_seen,
            confirmation_required: outcome.confirmation_required,
            fallback_used: outcome.fallback_used,
            fallback_reason: outcome.fallback_reason,
            raw_output: outcome.raw_output,
            verification,
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub(crate) fn from_error(ctx: RecordContext<'_>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            trace_key: ctx.trace_key.to_owned(),
            run_id: ctx.run_id.to_owned(),
            incident_id: ctx.incident.id.clone(),
            scenario: ctx.incident.scenario,
            severity: ctx.incident.severity,
            created_at: ctx.incident.created_at,
            worker_id: ctx.worker_id,
            latency_s: ctx.latency.as_secs_f64(),
            service_up: false,
            step_count: 0,
            tool_actions: Vec::new(),
            security_risks: Vec::new(),
            max_security_risk_seen: RiskLevel::Unknown,
            confirmation_required: false,
            fallback_used: false,
            fallback_reason: None,
            raw_output: error.clone(),
            verification: None,
            error: Some(error),
            completed_at: Utc::now(),
        }
    }

    /// True when the incident ended in an error rather than an outcome.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate metrics, recomputed on every state transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Incidents ever admitted to the queue in this run.
    pub total: usize,
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub fixed: usize,
    pub failed: usize,
    pub fallback_count: usize,
    pub confirmation_count: usize,
    /// Mean step count over completions that produced an outcome.
    pub avg_steps: f64,
    pub avg_latency_s: f64,
    pub throughput_per_s: f64,
    pub elapsed_s: f64,
    pub peak_active: usize,
    pub per_worker: BTreeMap<usize, usize>,
    pub per_scenario: BTreeMap<String, usize>,
}

/// Final result of [`Dispatcher::run`](super::Dispatcher::run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub run_id: String,
    pub status: RunStatus,
    pub summary: DispatchSummary,
    /// Retained completions, oldest first.
    pub records: Vec<RunRecord>,
    /// Agent session counters, cumulative over every run of this dispatcher.
    pub agent_session: Option<SessionMetricsSnapshot>,
}
