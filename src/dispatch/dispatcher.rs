//! Fan-out dispatch orchestration.
//!
//! `Dispatcher` owns the run loop and composes the focused submodules:
//! - `state` holds queue, active set and completed window behind one lock.
//! - `pool` spawns workers and routes assignments over per-worker channels.
//! - `worker` runs remediation plus verification for one incident at a time.
//! - `lifecycle` wires run-scoped cancellation, the metrics reporter and fatal
//!   error capture.
//!
//! Assignment is owned by the run loop alone: idle workers wait in a FIFO and
//! the head of the queue always goes to the longest-idle worker.

use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::pool::WorkerPool;
use super::record::{DispatchReport, RunRecord, RunStatus};
use super::state::{DispatcherSnapshot, DispatcherState};
use super::worker::{
    worker_event_channel, Assignment, VerificationTarget, WorkerEvent, WorkerShared,
};
use crate::incident::{Incident, IncidentGenerator};
use crate::remediation::RemediationRunner;
use crate::runtime::config::{DispatchConfig, DispatchMode};
use crate::runtime::telemetry::Telemetry;
use crate::strategy::StrategySource;
use crate::trace::{JsonlTraceSink, NullTraceSink, TraceSink};
use crate::verify::probe::DEFAULT_PROBE_TIMEOUT;
use crate::verify::{DockerInspector, HttpHealthProbe, StabilityVerifier};
use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, Interval};
use tokio_util::sync::CancellationToken;

const RUN_ID_FORMAT: &str = "%Y%m%d-%H%M%S";

pub struct Dispatcher {
    config: DispatchConfig,
    runner: Arc<RemediationRunner>,
    verifier: Option<Arc<StabilityVerifier>>,
    strategy: Arc<dyn StrategySource>,
    trace_sink: Arc<dyn TraceSink>,
    state: Arc<DispatcherState>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl Dispatcher {
    /// Creates a dispatcher around an already-built runner.
    ///
    /// No verifier and no trace sink are installed; use the `with_*` builders or
    /// [`Self::from_config`] for the fully wired variant.
    pub fn new(config: DispatchConfig, runner: RemediationRunner) -> Self {
        Self::with_cancellation_token(config, runner, CancellationToken::new())
    }

    /// Like [`Self::new`], but cancellation is driven by `shutdown`.
    ///
    /// The token is never reset: once cancelled, every later run ends as
    /// `cancelled` without assigning anything.
    pub fn with_cancellation_token(
        config: DispatchConfig,
        runner: RemediationRunner,
        shutdown: CancellationToken,
    ) -> Self {
        let state = Arc::new(DispatcherState::new(config.completed_retention()));
        let strategy = config.strategy().source();
        Self {
            config,
            runner: Arc::new(runner),
            verifier: None,
            strategy,
            trace_sink: Arc::new(NullTraceSink),
            state,
            telemetry: Arc::new(Telemetry::default()),
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    /// Builds the runner, verifier and trace sink the configuration describes.
    pub fn from_config(config: DispatchConfig) -> Result<Self> {
        let telemetry = Arc::new(Telemetry::default());
        let runner = RemediationRunner::from_config(&config)?.with_telemetry(telemetry.clone());
        let verify_real_runs = !config.simulate() && config.agent_url().is_some();
        let with_inspector = config.target_container().is_some();
        let trace_path = config.trace_path().cloned();

        let mut dispatcher = Self::new(config, runner).with_telemetry(telemetry);

        if verify_real_runs {
            let probe = HttpHealthProbe::new(DEFAULT_PROBE_TIMEOUT)?;
            let mut verifier = StabilityVerifier::new(Arc::new(probe));
            if with_inspector {
                verifier = verifier.with_inspector(Arc::new(DockerInspector::default()));
            }
            dispatcher = dispatcher.with_verifier(verifier);
        }

        if let Some(path) = trace_path {
            let sink = JsonlTraceSink::open(&path)?;
            tracing::info!(path = %path.display(), "writing trace records");
            dispatcher = dispatcher.with_trace_sink(Arc::new(sink));
        }

        Ok(dispatcher)
    }

    /// Verifies real (non-simulated, non-fallback) outcomes against the target.
    pub fn with_verifier(mut self, verifier: StabilityVerifier) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn StrategySource>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn state(&self) -> Arc<DispatcherState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        self.state.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Generates incidents per the configured mode and dispatches them.
    ///
    /// Returns `Err` only for fatal infrastructure failures; failed incidents are
    /// reported as failed completions inside the report.
    pub async fn run(&self) -> Result<DispatchReport> {
        let mut generator = IncidentGenerator::with_scenarios(
            self.config.seed(),
            self.config.scenarios().to_vec(),
        )?;

        match self.config.mode() {
            DispatchMode::OneShot { incidents } => {
                let batch = generator.batch(incidents);
                self.execute(batch, None).await
            }
            DispatchMode::Continuous {
                duration,
                arrival_rate,
            } => {
                let arrivals = ArrivalSchedule::new(generator, duration, arrival_rate);
                self.execute(Vec::new(), Some(arrivals)).await
            }
        }
    }

    /// Dispatches a caller-supplied batch in the given order, ignoring the configured mode.
    pub async fn run_incidents(&self, incidents: Vec<Incident>) -> Result<DispatchReport> {
        self.execute(incidents, None).await
    }

    async fn execute(
        &self,
        initial: Vec<Incident>,
        arrivals: Option<ArrivalSchedule>,
    ) -> Result<DispatchReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("dispatcher is already running");
        }
        let result = self.drive(initial, arrivals).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn drive(
        &self,
        initial: Vec<Incident>,
        mut arrivals: Option<ArrivalSchedule>,
    ) -> Result<DispatchReport> {
        let run_id = Utc::now().format(RUN_ID_FORMAT).to_string();
        let concurrency = self.config.concurrency();

        self.state.begin(&run_id);
        let admitted = self.state.enqueue(initial);
        self.telemetry.record_incidents_generated(admitted as u64);
        tracing::info!(
            run_id = %run_id,
            concurrency,
            mode = ?self.config.mode(),
            queued = admitted,
            "dispatch run started"
        );

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            telemetry: self.telemetry.clone(),
            state: self.state.clone(),
            metrics_interval: self.config.metrics_interval(),
        });
        let fatal_handler = lifecycle.fatal_handler();

        let (event_tx, mut event_rx) = worker_event_channel(concurrency.max(1));
        let mut pool = WorkerPool::new(concurrency);
        if let Err(err) = pool.launch(self.worker_shared(), event_tx, fatal_handler.clone()) {
            fatal_handler.trigger_external("worker pool launch", err);
        }

        let mut idle: VecDeque<usize> = (1..=pool.size()).collect();
        let mut cancel_requested = false;

        while !lifecycle.run_token.is_cancelled() {
            if !cancel_requested && self.shutdown.is_cancelled() {
                cancel_requested = true;
            }

            if !cancel_requested {
                if let Err(err) = self.assign_idle(&pool, &mut idle, &run_id).await {
                    fatal_handler.trigger_external("incident assignment", err);
                    break;
                }
            }

            let (queued, active) = self.state.depths();
            let arrivals_open =
                !cancel_requested && arrivals.as_ref().is_some_and(ArrivalSchedule::is_open);
            if active == 0 && (cancel_requested || (queued == 0 && !arrivals_open)) {
                break;
            }

            tokio::select! {
                biased;
                _ = lifecycle.run_token.cancelled() => break,
                _ = self.shutdown.cancelled(), if !cancel_requested => {
                    cancel_requested = true;
                    tracing::info!(
                        run_id = %run_id,
                        active,
                        queued,
                        "cancellation requested; draining in-flight incidents"
                    );
                }
                event = event_rx.recv() => match event {
                    Some(WorkerEvent { worker_id, record }) => {
                        if let Err(err) = self.record_completion(worker_id, record) {
                            fatal_handler.trigger_external("completion bookkeeping", err);
                            break;
                        }
                        idle.push_back(worker_id);
                    }
                    None => {
                        fatal_handler.trigger_external(
                            "worker events",
                            anyhow!("all workers stopped before the run finished"),
                        );
                        break;
                    }
                },
                arrival = next_arrival(&mut arrivals), if arrivals_open => {
                    if let Some(incident) = arrival {
                        tracing::debug!(
                            incident = %incident.id,
                            scenario = %incident.scenario,
                            severity = %incident.severity,
                            "incident arrived"
                        );
                        self.state.enqueue([incident]);
                        self.telemetry.record_incidents_generated(1);
                    }
                }
            }
        }

        let fatal_error = lifecycle.error();
        let handles = pool.shutdown().await;
        if fatal_error.is_some() {
            handles.iter().for_each(|handle| handle.abort());
        }
        for result in join_all(handles).await {
            if let Err(err) = result {
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, "worker task join failed");
                }
            }
        }
        lifecycle.shutdown().await;

        let status = if fatal_error.is_some() {
            RunStatus::Failed
        } else if cancel_requested || self.shutdown.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        self.state
            .finish(status, fatal_error.as_ref().map(|err| format!("{err:#}")));

        let summary = self.state.summary();
        let agent_session = self.runner.session_metrics();
        if let Some(session) = &agent_session {
            tracing::info!(
                run_id = %run_id,
                requests = session.total_requests,
                errors = session.total_errors,
                timeouts = session.total_timeouts,
                avg_latency_ms = format!("{:.2}", session.average_latency_ms),
                "agent session metrics"
            );
        }
        tracing::info!(
            run_id = %run_id,
            status = %status,
            completed = summary.completed,
            fixed = summary.fixed,
            failed = summary.failed,
            queued = summary.queued,
            avg_steps = format!("{:.2}", summary.avg_steps),
            avg_latency_s = format!("{:.2}", summary.avg_latency_s),
            throughput_per_s = format!("{:.2}", summary.throughput_per_s),
            "dispatch run finished"
        );

        if let Some(err) = fatal_error {
            return Err(err.context(format!("dispatch run {run_id} failed")));
        }

        Ok(DispatchReport {
            run_id,
            status,
            summary,
            records: self.state.completed(),
            agent_session,
        })
    }

    /// Pairs idle workers with queued incidents until either runs out.
    async fn assign_idle(
        &self,
        pool: &WorkerPool,
        idle: &mut VecDeque<usize>,
        run_id: &str,
    ) -> Result<()> {
        while let Some(&worker_id) = idle.front() {
            let Some(active) = self.state.assign_next(worker_id)? else {
                break;
            };
            idle.pop_front();
            tracing::debug!(
                worker = worker_id,
                incident = %active.incident.id,
                trace_key = %active.trace_key,
                "assigning incident"
            );
            pool.assign(
                worker_id,
                Assignment {
                    incident: active.incident,
                    run_id: run_id.to_owned(),
                    trace_key: active.trace_key,
                },
            )
            .await?;
        }
        Ok(())
    }

    fn record_completion(&self, worker_id: usize, record: RunRecord) -> Result<()> {
        self.state.complete(worker_id, record.clone())?;
        self.telemetry.record_completion(record.service_up);

        tracing::info!(
            worker = worker_id,
            incident = %record.incident_id,
            scenario = %record.scenario,
            severity = %record.severity,
            service_up = record.service_up,
            steps = record.step_count,
            fallback = record.fallback_used,
            latency_s = format!("{:.2}", record.latency_s),
            "incident completed"
        );

        if let Err(err) = self.trace_sink.record(&record) {
            tracing::warn!(
                trace_key = %record.trace_key,
                error = %err,
                "failed to write trace record"
            );
        }
        Ok(())
    }

    fn worker_shared(&self) -> WorkerShared {
        let config = &self.config;
        WorkerShared {
            runner: self.runner.clone(),
            strategy: self.strategy.clone(),
            policy: config.policy().clone(),
            dry_run: config.simulate(),
            simulate_latency: config.simulate_latency(),
            verification: self.verifier.as_ref().map(|verifier| VerificationTarget {
                verifier: verifier.clone(),
                url: config.target_url().to_owned(),
                settings: *config.verification(),
                container: config.target_container().map(str::to_owned),
                expected_image: config.expected_image().map(str::to_owned),
            }),
            telemetry: self.telemetry.clone(),
        }
    }
}

/// Continuous-mode arrival clock. The first incident arrives immediately.
struct ArrivalSchedule {
    generator: IncidentGenerator,
    ticker: Interval,
    deadline: Instant,
    closed: bool,
}

impl ArrivalSchedule {
    fn new(generator: IncidentGenerator, duration: Duration, arrival_rate: f64) -> Self {
        let start = Instant::now();
        Self {
            generator,
            ticker: time::interval_at(start, DispatchMode::arrival_interval(arrival_rate)),
            deadline: start + duration,
            closed: false,
        }
    }

    fn is_open(&self) -> bool {
        !self.closed
    }

    async fn next(&mut self) -> Option<Incident> {
        if self.closed {
            return None;
        }
        match time::timeout_at(self.deadline, self.ticker.tick()).await {
            Ok(tick) if tick < self.deadline => Some(self.generator.next_incident()),
            _ => {
                self.closed = true;
                None
            }
        }
    }
}

async fn next_arrival(arrivals: &mut Option<ArrivalSchedule>) -> Option<Incident> {
    match arrivals {
        Some(schedule) => schedule.next().await,
        None => None,
    }
}
