//! Shared dispatcher state: queue, active set and completed window behind one lock.
//!
//! Every admitted incident sits in exactly one of the three places. Snapshots
//! are deep copies taken under the lock, so readers never observe a
//! half-applied transition.

use super::record::{DispatchSummary, RunRecord, RunStatus};
use crate::incident::Incident;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

/// An incident currently held by a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveIncident {
    pub incident: Incident,
    pub worker_id: usize,
    pub trace_key: String,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time copy of the dispatcher state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatcherSnapshot {
    pub run_id: Option<String>,
    pub status: RunStatus,
    pub queue: Vec<Incident>,
    /// Ordered by worker id.
    pub active: Vec<ActiveIncident>,
    /// Retained completions, oldest first.
    pub completed: Vec<RunRecord>,
    pub summary: DispatchSummary,
    pub error: Option<String>,
}

pub struct DispatcherState {
    inner: Mutex<StateInner>,
}

#[derive(Default)]
struct StateInner {
    run_id: Option<String>,
    status: RunStatus,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    retention: usize,
    queue: VecDeque<Incident>,
    active: BTreeMap<usize, ActiveIncident>,
    completed: VecDeque<RunRecord>,
    totals: Totals,
    summary: DispatchSummary,
    error: Option<String>,
}

/// Running aggregates over every completion, including ones evicted from the window.
#[derive(Default)]
struct Totals {
    admitted: usize,
    completed: usize,
    fixed: usize,
    fallbacks: usize,
    confirmations: usize,
    outcome_steps: usize,
    outcomes: usize,
    latency_s: f64,
    peak_active: usize,
    per_worker: BTreeMap<usize, usize>,
    per_scenario: BTreeMap<String, usize>,
}

impl DispatcherState {
    pub fn new(retention: usize) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                retention: retention.max(1),
                ..StateInner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateInner> {
        self.inner.lock().expect("dispatcher state mutex poisoned")
    }

    /// Clears all queues and marks a new run as running.
    pub(crate) fn begin(&self, run_id: &str) {
        let mut inner = self.lock();
        let retention = inner.retention;
        *inner = StateInner {
            run_id: Some(run_id.to_owned()),
            status: RunStatus::Running,
            started_at: Some(Instant::now()),
            retention,
            ..StateInner::default()
        };
        inner.refresh_summary();
    }

    pub(crate) fn enqueue(&self, incidents: impl IntoIterator<Item = Incident>) -> usize {
        let mut inner = self.lock();
        let before = inner.queue.len();
        inner.queue.extend(incidents);
        let added = inner.queue.len() - before;
        inner.totals.admitted += added;
        inner.refresh_summary();
        added
    }

    /// Moves the head of the queue into the active set under `worker_id`.
    pub(crate) fn assign_next(&self, worker_id: usize) -> Result<Option<ActiveIncident>> {
        let mut inner = self.lock();
        if inner.active.contains_key(&worker_id) {
            bail!("worker {worker_id} already holds an incident");
        }
        let Some(incident) = inner.queue.pop_front() else {
            return Ok(None);
        };
        let run_id = inner.run_id.clone().unwrap_or_default();
        let active = ActiveIncident {
            trace_key: format!("{run_id}:{}", incident.id),
            incident,
            worker_id,
            started_at: Utc::now(),
        };
        inner.active.insert(worker_id, active.clone());
        inner.totals.peak_active = inner.totals.peak_active.max(inner.active.len());
        inner.refresh_summary();
        Ok(Some(active))
    }

    /// Moves the incident held by `worker_id` into the completed window.
    pub(crate) fn complete(&self, worker_id: usize, record: RunRecord) -> Result<()> {
        let mut inner = self.lock();
        let Some(active) = inner.active.remove(&worker_id) else {
            bail!("worker {worker_id} completed without an active incident");
        };
        if active.incident.id != record.incident_id {
            let incident_id = active.incident.id.clone();
            inner.active.insert(worker_id, active);
            bail!(
                "worker {worker_id} completed {} while holding {incident_id}",
                record.incident_id
            );
        }

        let totals = &mut inner.totals;
        totals.completed += 1;
        if record.service_up {
            totals.fixed += 1;
        }
        if record.fallback_used {
            totals.fallbacks += 1;
        }
        if record.confirmation_required {
            totals.confirmations += 1;
        }
        if !record.is_error() {
            totals.outcomes += 1;
            totals.outcome_steps += record.step_count;
        }
        totals.latency_s += record.latency_s;
        *totals.per_worker.entry(worker_id).or_default() += 1;
        *totals
            .per_scenario
            .entry(record.scenario.as_str().to_owned())
            .or_default() += 1;

        inner.completed.push_back(record);
        while inner.completed.len() > inner.retention {
            inner.completed.pop_front();
        }
        inner.refresh_summary();
        Ok(())
    }

    pub(crate) fn finish(&self, status: RunStatus, error: Option<String>) {
        let mut inner = self.lock();
        inner.status = status;
        inner.error = error;
        inner.finished_at = Some(Instant::now());
        inner.refresh_summary();
    }

    /// Queue and active lengths.
    pub fn depths(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.queue.len(), inner.active.len())
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub fn summary(&self) -> DispatchSummary {
        let mut inner = self.lock();
        inner.refresh_summary();
        inner.summary.clone()
    }

    pub fn completed(&self) -> Vec<RunRecord> {
        self.lock().completed.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        let mut inner = self.lock();
        inner.refresh_summary();
        DispatcherSnapshot {
            run_id: inner.run_id.clone(),
            status: inner.status,
            queue: inner.queue.iter().cloned().collect(),
            active: inner.active.values().cloned().collect(),
            completed: inner.completed.iter().cloned().collect(),
            summary: inner.summary.clone(),
            error: inner.error.clone(),
        }
    }
}

impl StateInner {
    fn refresh_summary(&mut self) {
        let totals = &self.totals;
        let elapsed_s = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start).as_secs_f64(),
            (Some(start), None) => start.elapsed().as_secs_f64(),
            _ => 0.0,
        };

        self.summary = DispatchSummary {
            total: totals.admitted,
            queued: self.queue.len(),
            active: self.active.len(),
            completed: totals.completed,
            fixed: totals.fixed,
            failed: totals.completed - totals.fixed,
            fallback_count: totals.fallbacks,
            confirmation_count: totals.confirmations,
            avg_steps: mean(totals.outcome_steps as f64, totals.outcomes),
            avg_latency_s: mean(totals.latency_s, totals.completed),
            throughput_per_s: if elapsed_s <= f64::EPSILON {
                0.0
            } else {
                totals.completed as f64 / elapsed_s
            },
            elapsed_s,
            peak_active: totals.peak_active,
            per_worker: totals.per_worker.clone(),
            per_scenario: totals.per_scenario.clone(),
        };
    }
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::record::RecordContext;
    use crate::incident::{Scenario, Severity};
    use std::time::Duration;

    fn incidents(count: usize) -> Vec<Incident> {
        (1..=count)
            .map(|i| Incident::new(format!("inc-{i:04}"), Scenario::StaleLockfile, Severity::High))
            .collect()
    }

    fn record(active: &ActiveIncident, service_up: bool, steps: usize) -> RunRecord {
        let mut record = RunRecord::from_error(
            RecordContext {
                incident: &active.incident,
                run_id: "run",
                trace_key: &active.trace_key,
                worker_id: active.worker_id,
                latency: Duration::from_secs(2),
            },
            "placeholder",
        );
        record.error = None;
        record.service_up = service_up;
        record.step_count = steps;
        record
    }

    #[test]
    fn incidents_move_queue_to_active_to_completed() {
        let state = DispatcherState::new(10);
        state.begin("run");
        assert_eq!(state.enqueue(incidents(3)), 3);

        let first = state.assign_next(1).unwrap().unwrap();
        assert_eq!(first.incident.id, "inc-0001");
        assert_eq!(first.trace_key, "run:inc-0001");
        let second = state.assign_next(2).unwrap().unwrap();
        assert_eq!(state.depths(), (1, 2));

        state.complete(1, record(&first, true, 3)).unwrap();
        state.complete(2, record(&second, false, 5)).unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.queue.len(), 1);
        assert!(snapshot.active.is_empty());
        assert_eq!(snapshot.completed.len(), 2);

        let summary = snapshot.summary;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.fixed, 1);
        assert_eq!(summary.failed, 1);
        assert!((summary.avg_steps - 4.0).abs() < 1e-9);
        assert!((summary.avg_latency_s - 2.0).abs() < 1e-9);
        assert_eq!(summary.peak_active, 2);
        assert_eq!(summary.per_worker.get(&1), Some(&1));
        assert_eq!(summary.per_scenario.get("stale_lockfile"), Some(&2));
    }

    #[test]
    fn a_worker_holds_at_most_one_incident() {
        let state = DispatcherState::new(10);
        state.begin("run");
        state.enqueue(incidents(2));
        state.assign_next(1).unwrap();
        assert!(state.assign_next(1).is_err());
        assert_eq!(state.depths(), (1, 1));
    }

    #[test]
    fn completion_must_match_the_held_incident() {
        let state = DispatcherState::new(10);
        state.begin("run");
        state.enqueue(incidents(2));
        let first = state.assign_next(1).unwrap().unwrap();
        let second = state.assign_next(2).unwrap().unwrap();

        assert!(state.complete(1, record(&second, true, 1)).is_err());
        assert_eq!(state.depths(), (0, 2));
        assert!(state.complete(3, record(&first, true, 1)).is_err());
    }

    #[test]
    fn completed_window_is_bounded_but_totals_are_not() {
        let state = DispatcherState::new(2);
        state.begin("run");
        state.enqueue(incidents(5));
        for _ in 0..5 {
            let active = state.assign_next(1).unwrap().unwrap();
            state.complete(1, record(&active, true, 3)).unwrap();
        }

        let snapshot = state.snapshot();
        let ids: Vec<_> = snapshot
            .completed
            .iter()
            .map(|record| record.incident_id.as_str())
            .collect();
        assert_eq!(ids, vec!["inc-0004", "inc-0005"]);
        assert_eq!(snapshot.summary.completed, 5);
        assert_eq!(snapshot.summary.fixed, 5);
    }

    #[test]
    fn error_records_are_excluded_from_avg_steps() {
        let state = DispatcherState::new(10);
        state.begin("run");
        state.enqueue(incidents(2));
        let ok = state.assign_next(1).unwrap().unwrap();
        let broken = state.assign_next(2).unwrap().unwrap();
        state.complete(1, record(&ok, true, 6)).unwrap();
        let mut failed = record(&broken, false, 0);
        failed.error = Some("boom".into());
        state.complete(2, failed).unwrap();

        let summary = state.summary();
        assert_eq!(summary.failed, 1);
        assert!((summary.avg_steps - 6.0).abs() < 1e-9);
    }

    #[test]
    fn begin_resets_previous_run() {
        let state = DispatcherState::new(10);
        state.begin("first");
        state.enqueue(incidents(2));
        state.finish(RunStatus::Cancelled, None);
        assert_eq!(state.status(), RunStatus::Cancelled);

        state.begin("second");
        let snapshot = state.snapshot();
        assert_eq!(snapshot.run_id.as_deref(), Some("second"));
        assert_eq!(snapshot.status, RunStatus::Running);
        assert!(snapshot.queue.is_empty());
        assert_eq!(snapshot.summary.total, 0);
    }
}
