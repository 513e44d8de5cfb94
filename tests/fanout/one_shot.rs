use std::collections::HashSet;

use crate::support::helpers::{assert_unique_trace_keys, init_tracing, simulated_builder};
use anyhow::Result;
use remediator::{Dispatcher, RunRecord, RunStatus, Severity};
use serde_json::Value;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_shot_run_writes_one_trace_line_per_incident() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let trace_path = dir.path().join("run.jsonl");
    let config = simulated_builder(4)
        .one_shot(20)
        .seed(7)
        .trace_path(&trace_path)
        .build()?;

    let dispatcher = Dispatcher::from_config(config)?;
    let report = dispatcher.run().await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.summary.total, 20);
    assert_eq!(report.summary.completed, 20);
    assert_eq!(report.summary.fixed, 20);
    assert_eq!(report.summary.failed, 0);
    assert!(report.summary.peak_active <= 4);
    assert!(report.summary.throughput_per_s > 0.0);

    let lines: Vec<Value> = std::fs::read_to_string(&trace_path)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 20);
    let incident_ids: HashSet<&str> = lines
        .iter()
        .filter_map(|line| line["incident_id"].as_str())
        .collect();
    assert_eq!(incident_ids.len(), 20);

    assert!(report.agent_session.is_none());
    assert_unique_trace_keys(&report.records);
    for record in &report.records {
        assert!((1..=4).contains(&record.worker_id));
        assert!(record.trace_key.starts_with(&report.run_id));
    }

    let telemetry = dispatcher.telemetry().snapshot();
    assert_eq!(telemetry.incidents_generated, 20);
    assert_eq!(telemetry.completed, 20);
    assert_eq!(telemetry.fixed, 20);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_seed_dispatches_same_incidents() -> Result<()> {
    init_tracing();

    async fn fingerprint(seed: u64) -> Result<Vec<(String, String, Severity)>> {
        let config = simulated_builder(1).one_shot(12).seed(seed).build()?;
        let report = Dispatcher::from_config(config)?.run().await?;
        Ok(report
            .records
            .iter()
            .map(|record: &RunRecord| {
                (
                    record.incident_id.clone(),
                    record.scenario.to_string(),
                    record.severity,
                )
            })
            .collect())
    }

    let first = fingerprint(42).await?;
    let second = fingerprint(42).await?;
    assert_eq!(first, second);

    let ranks: Vec<u8> = first.iter().map(|(_, _, severity)| severity.rank()).collect();
    assert!(ranks.windows(2).all(|pair| pair[0] >= pair[1]));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn completed_window_keeps_only_the_newest_records() -> Result<()> {
    init_tracing();
    let config = simulated_builder(2)
        .one_shot(10)
        .completed_retention(3)
        .build()?;
    let dispatcher = Dispatcher::from_config(config)?;

    let report = dispatcher.run().await?;

    assert_eq!(report.summary.completed, 10);
    assert_eq!(report.records.len(), 3);
    assert_eq!(dispatcher.snapshot().completed.len(), 3);
    let per_scenario_total: usize = report.summary.per_scenario.values().sum();
    assert_eq!(per_scenario_total, 10);
    Ok(())
}
