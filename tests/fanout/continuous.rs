use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::support::helpers::{init_tracing, simulated_builder, wait_for_completed};
use anyhow::Result;
use remediator::{Dispatcher, FanoutSupervisor, RunStatus};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn continuous_run_drains_everything_that_arrived() -> Result<()> {
    init_tracing();
    let config = simulated_builder(3)
        .continuous(Duration::from_millis(400), 25.0)
        .simulate_latency(Duration::from_millis(5))
        .build()?;
    let dispatcher = Dispatcher::from_config(config)?;

    let report = dispatcher.run().await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.summary.total >= 5, "only {} arrivals", report.summary.total);
    assert!(report.summary.total <= 11, "{} arrivals", report.summary.total);
    assert_eq!(report.summary.completed, report.summary.total);
    assert_eq!(report.summary.queued, 0);
    assert_eq!(report.summary.active, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_a_continuous_run_stops_arrivals_and_drains_workers() -> Result<()> {
    init_tracing();
    let config = simulated_builder(2)
        .continuous(Duration::from_secs(30), 50.0)
        .simulate_latency(Duration::from_millis(40))
        .build()?;
    let supervisor = FanoutSupervisor::new(Dispatcher::from_config(config)?);
    let dispatcher = supervisor.dispatcher();
    let token = supervisor.cancellation_token();

    let started = Instant::now();
    let run = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.run().await }
    });

    wait_for_completed(&dispatcher, 3, Duration::from_secs(5)).await?;
    token.cancel();
    let report = run.await??;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.summary.active, 0);
    assert!(report.summary.completed >= 3);
    assert_eq!(
        report.summary.total,
        report.summary.completed + report.summary.queued
    );

    let snapshot = dispatcher.snapshot();
    assert_eq!(snapshot.status, RunStatus::Cancelled);
    assert_eq!(snapshot.queue.len(), report.summary.queued);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_run_is_rejected_while_first_is_running() -> Result<()> {
    init_tracing();
    let config = simulated_builder(1)
        .one_shot(5)
        .simulate_latency(Duration::from_millis(50))
        .build()?;
    let dispatcher = Arc::new(Dispatcher::from_config(config)?);

    let first = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.run().await }
    });
    wait_for_completed(&dispatcher, 1, Duration::from_secs(5)).await?;

    let err = dispatcher.run().await.unwrap_err();
    assert!(format!("{err}").contains("already running"));

    let report = first.await??;
    assert_eq!(report.summary.completed, 5);
    Ok(())
}
