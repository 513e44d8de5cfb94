use std::time::{Duration, Instant};

use crate::support::helpers::{agent_builder, init_tracing};
use crate::support::mock_agent::{action, lockfile_fix_events, observation, AgentScript, MockAgentServer};
use crate::support::mock_target::MockTarget;
use anyhow::Result;
use remediator::{Dispatcher, RiskLevel, RunStatus, Scenario, SecurityPolicy};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn agent_remediation_is_verified_and_traced() -> Result<()> {
    init_tracing();
    let agent = MockAgentServer::start(AgentScript::new(lockfile_fix_events()).fail_opens(1)).await?;
    let target = MockTarget::healthy("stale_lockfile").await?;

    let config = agent_builder(2, agent.url(), target.url())
        .one_shot(4)
        .scenarios(vec![Scenario::StaleLockfile])
        .build()?;
    let dispatcher = Dispatcher::from_config(config)?;
    let report = dispatcher.run().await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.summary.completed, 4);
    assert_eq!(report.summary.fixed, 4);
    assert_eq!(report.summary.fallback_count, 0);
    assert!((report.summary.avg_steps - 3.0).abs() < 1e-9);

    for record in &report.records {
        assert_eq!(record.tool_actions, vec!["terminal"; 3]);
        assert_eq!(record.security_risks, vec![RiskLevel::Low; 3]);
        assert_eq!(record.max_security_risk_seen, RiskLevel::Low);
        assert_eq!(record.raw_output, "{\"status\":\"ok\"}");
        let verification = record.verification.as_ref().expect("verified against target");
        assert!(verification.verified);
        assert_eq!(verification.attempts, vec!["200", "200"]);
    }

    let script = agent.script();
    assert_eq!(script.opens(), 4);
    assert_eq!(script.closes(), 4);
    let tasks = script.tasks();
    assert_eq!(tasks.len(), 4);
    for task in &tasks {
        assert!(task.contains("status='ok' and scenario='stale_lockfile'"));
        assert!(task.contains(&format!("Trace key: {}:", report.run_id)));
        assert!(task.contains(target.url()));
    }

    let telemetry = dispatcher.telemetry().snapshot();
    assert_eq!(telemetry.backend_retries, 1);
    assert_eq!(telemetry.fixed, 4);

    // One rejected open, then open/send/run/status/events/close per incident.
    let session = report.agent_session.expect("agent session metrics reported");
    assert_eq!(session.total_requests, 1 + 4 * 6);
    assert_eq!(session.total_errors, 1);
    assert_eq!(session.total_timeouts, 0);
    drop(dispatcher);

    agent.shutdown().await;
    target.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn risky_agent_run_falls_back_to_simulation() -> Result<()> {
    init_tracing();
    let events = vec![
        action("terminal", "SecurityRisk.HIGH", "docker rm -f svc"),
        observation("removed"),
    ];
    let agent = MockAgentServer::start(AgentScript::new(events)).await?;
    let target = MockTarget::healthy("bad_env_config").await?;

    let config = agent_builder(2, agent.url(), target.url())
        .one_shot(3)
        .scenarios(vec![Scenario::BadEnvConfig])
        .allow_fallback(true)
        .policy(SecurityPolicy {
            max_security_risk: RiskLevel::Medium,
            ..SecurityPolicy::default()
        })
        .build()?;
    let dispatcher = Dispatcher::from_config(config)?;
    let report = dispatcher.run().await?;

    assert_eq!(report.summary.completed, 3);
    assert_eq!(report.summary.fallback_count, 3);
    for record in &report.records {
        assert!(record.fallback_used);
        assert_eq!(
            record.fallback_reason.as_deref(),
            Some("Security policy violation: max risk seen HIGH exceeds allowed MEDIUM")
        );
        assert!(record.verification.is_none(), "fallback outcomes are not verified");
    }
    assert_eq!(target.hits(), 0);
    assert_eq!(agent.script().opens(), 3, "policy violations are never retried");
    assert_eq!(dispatcher.telemetry().snapshot().policy_violations, 3);
    drop(dispatcher);

    agent.shutdown().await;
    target.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn agent_without_tool_actions_fails_once_per_incident() -> Result<()> {
    init_tracing();
    let agent = MockAgentServer::start(AgentScript::new(vec![observation("nothing to do")])).await?;
    let target = MockTarget::healthy("port_mismatch").await?;

    let config = agent_builder(2, agent.url(), target.url())
        .one_shot(4)
        .build()?;
    let dispatcher = Dispatcher::from_config(config)?;
    let report = dispatcher.run().await?;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.summary.completed, 4);
    assert_eq!(report.summary.failed, 4);
    assert_eq!(report.summary.queued, 0);
    assert_eq!(agent.script().opens(), 4);
    for record in &report.records {
        let error = record.error.as_deref().expect("failure recorded");
        assert!(error.contains("without terminal or file_editor tool actions"));
        assert_eq!(record.step_count, 0);
    }
    drop(dispatcher);

    agent.shutdown().await;
    target.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_agent_connection_falls_back_without_retrying() -> Result<()> {
    init_tracing();
    let config = agent_builder(1, "http://127.0.0.1:9", "http://127.0.0.1:9/health")
        .one_shot(1)
        .allow_fallback(true)
        .max_retries(2)
        .backoff_unit(Duration::from_secs(5))
        .build()?;
    let dispatcher = Dispatcher::from_config(config)?;
    let started = Instant::now();
    let report = dispatcher.run().await?;

    let record = &report.records[0];
    assert!(record.fallback_used);
    assert!(record.service_up);
    let reason = record.fallback_reason.as_deref().expect("fallback reason");
    assert!(reason.contains("session.open transport failure"), "unexpected reason: {reason}");
    assert_eq!(dispatcher.telemetry().snapshot().backend_retries, 0);
    assert!(started.elapsed() < Duration::from_secs(5), "refused connection was retried");
    Ok(())
}
