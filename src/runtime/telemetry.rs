use crate::dispatch::DispatcherState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Process-wide counters shared by the runner, workers and dispatcher.
#[derive(Default, Debug)]
pub struct Telemetry {
    incidents_generated: AtomicU64,
    completed: AtomicU64,
    fixed: AtomicU64,
    failed: AtomicU64,
    fallbacks_used: AtomicU64,
    policy_violations: AtomicU64,
    backend_retries: AtomicU64,
    verification_failures: AtomicU64,
}

impl Telemetry {
    pub fn record_incidents_generated(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.incidents_generated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_completion(&self, fixed: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if fixed {
            self.fixed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_fallback(&self) {
        self.fallbacks_used.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_policy_violation(&self) {
        self.policy_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backend_retry(&self) {
        self.backend_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verification_failure(&self) {
        self.verification_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            incidents_generated: self.incidents_generated.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            fixed: self.fixed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            fallbacks_used: self.fallbacks_used.load(Ordering::Relaxed),
            policy_violations: self.policy_violations.load(Ordering::Relaxed),
            backend_retries: self.backend_retries.load(Ordering::Relaxed),
            verification_failures: self.verification_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub incidents_generated: u64,
    pub completed: u64,
    pub fixed: u64,
    pub failed: u64,
    pub fallbacks_used: u64,
    pub policy_violations: u64,
    pub backend_retries: u64,
    pub verification_failures: u64,
}

/// Spawns a background task that periodically logs completion rate, queue depth and failures.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    state: Arc<DispatcherState>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "remediator::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let completed_delta = current_snapshot
                        .completed
                        .saturating_sub(last_snapshot.completed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        completed_delta as f64 / elapsed
                    };
                    let (queued, active) = state.depths();

                    tracing::info!(
                        target: "remediator::metrics",
                        throughput = format!("{throughput:.2}"),
                        queued,
                        active,
                        completed = current_snapshot.completed,
                        fixed = current_snapshot.fixed,
                        failed = current_snapshot.failed,
                        fallbacks = current_snapshot.fallbacks_used,
                        retries = current_snapshot.backend_retries,
                        policy_violations = current_snapshot.policy_violations,
                        "dispatch metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
