//! Incident workers.
//!
//! A worker owns one control channel, takes one [`Assignment`] at a time and
//! reports a [`RunRecord`] for every assignment it accepted, whatever happened
//! while processing it.

use super::record::{RecordContext, RunRecord};
use crate::backend::Outcome;
use crate::incident::Incident;
use crate::remediation::{RemediationError, RemediationRequest, RemediationRunner, SecurityPolicy};
use crate::runtime::telemetry::Telemetry;
use crate::strategy::StrategySource;
use crate::verify::{StabilityVerifier, VerificationResult, VerificationSettings};
use anyhow::{Context, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub(crate) struct Assignment {
    pub incident: Incident,
    pub run_id: String,
    pub trace_key: String,
}

#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Assign(Assignment),
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct WorkerEvent {
    pub worker_id: usize,
    pub record: RunRecord,
}

pub(crate) type WorkerCommandSender = mpsc::Sender<WorkerCommand>;
pub(crate) type WorkerCommandReceiver = mpsc::Receiver<WorkerCommand>;
pub(crate) type WorkerEventSender = mpsc::Sender<WorkerEvent>;
pub(crate) type WorkerEventReceiver = mpsc::Receiver<WorkerEvent>;

pub(crate) fn worker_command_channel(capacity: usize) -> (WorkerCommandSender, WorkerCommandReceiver) {
    mpsc::channel(capacity)
}

pub(crate) fn worker_event_channel(capacity: usize) -> (WorkerEventSender, WorkerEventReceiver) {
    mpsc::channel(capacity)
}

/// Verification target for real remediations.
#[derive(Clone)]
pub(crate) struct VerificationTarget {
    pub verifier: Arc<StabilityVerifier>,
    pub url: String,
    pub settings: VerificationSettings,
    pub container: Option<String>,
    pub expected_image: Option<String>,
}

/// Everything workers share for the duration of a run.
#[derive(Clone)]
pub(crate) struct WorkerShared {
    pub runner: Arc<RemediationRunner>,
    pub strategy: Arc<dyn StrategySource>,
    pub policy: SecurityPolicy,
    pub dry_run: bool,
    pub simulate_latency: Duration,
    pub verification: Option<VerificationTarget>,
    pub telemetry: Arc<Telemetry>,
}

pub(crate) struct IncidentWorker {
    id: usize,
    shared: WorkerShared,
    commands: WorkerCommandReceiver,
    events: WorkerEventSender,
}

impl IncidentWorker {
    pub(crate) fn new(
        id: usize,
        shared: WorkerShared,
        commands: WorkerCommandReceiver,
        events: WorkerEventSender,
    ) -> Self {
        Self {
            id,
            shared,
            commands,
            events,
        }
    }

    pub(crate) async fn run(mut self) -> Result<()> {
        while let Some(command) = self.commands.recv().await {
            match command {
                WorkerCommand::Shutdown => break,
                WorkerCommand::Assign(assignment) => {
                    let record = self.handle(assignment).await;
                    self.events
                        .send(WorkerEvent {
                            worker_id: self.id,
                            record,
                        })
                        .await
                        .with_context(|| {
                            format!("worker {} could not report a completion", self.id)
                        })?;
                }
            }
        }
        tracing::debug!(worker = self.id, "worker stopped");
        Ok(())
    }

    async fn handle(&self, assignment: Assignment) -> RunRecord {
        let started = Instant::now();
        tracing::debug!(
            worker = self.id,
            incident = %assignment.incident.id,
            severity = %assignment.incident.severity,
            "incident assigned"
        );

        let result = AssertUnwindSafe(process_incident(&self.shared, &assignment))
            .catch_unwind()
            .await;

        let ctx = RecordContext {
            incident: &assignment.incident,
            run_id: &assignment.run_id,
            trace_key: &assignment.trace_key,
            worker_id: self.id,
            latency: started.elapsed(),
        };

        match result {
            Ok(Ok((outcome, verification))) => RunRecord::from_outcome(ctx, outcome, verification),
            Ok(Err(err)) => {
                tracing::warn!(
                    worker = self.id,
                    incident = %assignment.incident.id,
                    attempts = err.attempts(),
                    error = %err,
                    "incident remediation failed"
                );
                RunRecord::from_error(ctx, err.to_string())
            }
            Err(panic_payload) => {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(
                    worker = self.id,
                    incident = %assignment.incident.id,
                    panic = %panic_msg,
                    "incident processing panicked"
                );
                RunRecord::from_error(ctx, format!("worker {} panicked: {panic_msg}", self.id))
            }
        }
    }
}

async fn process_incident(
    shared: &WorkerShared,
    assignment: &Assignment,
) -> Result<(Outcome, Option<VerificationResult>), RemediationError> {
    let incident = &assignment.incident;
    let dry_run = shared.dry_run || shared.runner.mode().is_simulated();

    if dry_run && !shared.simulate_latency.is_zero() {
        sleep(shared.simulate_latency).await;
    }

    let hint = shared
        .strategy
        .strategy_hint(incident.scenario, &incident.description());
    let mut outcome = shared
        .runner
        .remediate(RemediationRequest {
            strategy_hint: &hint,
            incident,
            policy: &shared.policy,
            dry_run: shared.dry_run,
            trace_key: Some(assignment.trace_key.as_str()),
        })
        .await?;

    // Simulated and fallback outcomes never touched the target.
    if dry_run || outcome.fallback_used {
        return Ok((outcome, None));
    }
    let Some(target) = &shared.verification else {
        return Ok((outcome, None));
    };

    let mut result = target
        .verifier
        .verify(&target.url, incident.scenario.as_str(), &target.settings)
        .await;

    if result.verified {
        if let Some(container) = &target.container {
            if let Err(reason) = target
                .verifier
                .verify_identity(container, target.expected_image.as_deref())
                .await
            {
                result.verified = false;
                result.last_failure = Some(reason);
            }
        }
    }

    if !result.verified {
        shared.telemetry.record_verification_failure();
    }
    outcome.service_up = result.verified;
    Ok((outcome, Some(result)))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
