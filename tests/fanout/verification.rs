use std::sync::Arc;

use crate::support::helpers::{agent_builder, fast_verification, init_tracing};
use crate::support::mock_agent::{lockfile_fix_events, AgentScript, MockAgentServer};
use crate::support::mock_target::{HealthReply, MockTarget};
use anyhow::Result;
use futures::future::BoxFuture;
use remediator::verify::{
    ContainerIdentity, ContainerInspector, HttpHealthProbe, StabilityVerifier,
};
use remediator::{Dispatcher, RemediationRunner, Scenario};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flapping_target_is_fixed_once_the_streak_holds() -> Result<()> {
    init_tracing();
    let agent = MockAgentServer::start(AgentScript::new(lockfile_fix_events())).await?;
    let target = MockTarget::start(
        vec![HealthReply::unavailable(), HealthReply::unavailable()],
        HealthReply::healthy("stale_lockfile"),
    )
    .await?;

    let config = agent_builder(1, agent.url(), target.url())
        .one_shot(1)
        .scenarios(vec![Scenario::StaleLockfile])
        .verification(fast_verification(2, 5))
        .build()?;
    let report = Dispatcher::from_config(config)?.run().await?;

    let record = &report.records[0];
    assert!(record.service_up);
    let verification = record.verification.as_ref().expect("verification ran");
    assert_eq!(verification.attempts, vec!["503", "503", "200", "200"]);
    assert_eq!(verification.last_failure.as_deref(), Some("HTTP 503"));
    assert_eq!(target.hits(), 4);

    agent.shutdown().await;
    target.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_scenario_in_health_payload_is_not_fixed() -> Result<()> {
    init_tracing();
    let agent = MockAgentServer::start(AgentScript::new(lockfile_fix_events())).await?;
    let target = MockTarget::healthy("port_mismatch").await?;

    let config = agent_builder(1, agent.url(), target.url())
        .one_shot(2)
        .scenarios(vec![Scenario::StaleLockfile])
        .verification(fast_verification(2, 3))
        .build()?;
    let dispatcher = Dispatcher::from_config(config)?;
    let report = dispatcher.run().await?;

    assert_eq!(report.summary.fixed, 0);
    assert_eq!(report.summary.failed, 2);
    for record in &report.records {
        assert!(!record.service_up);
        assert!(record.error.is_none());
        let verification = record.verification.as_ref().expect("verification ran");
        assert_eq!(verification.attempts.len(), 3);
        assert_eq!(
            verification.last_failure.as_deref(),
            Some("scenario field is 'port_mismatch' but expected 'stale_lockfile'")
        );
    }
    assert_eq!(dispatcher.telemetry().snapshot().verification_failures, 2);
    drop(dispatcher);

    agent.shutdown().await;
    target.shutdown().await;
    Ok(())
}

struct ReplacedContainer;

impl ContainerInspector for ReplacedContainer {
    fn inspect<'a>(&'a self, container: &'a str) -> BoxFuture<'a, Result<ContainerIdentity>> {
        let identity = ContainerIdentity {
            name: container.to_owned(),
            image: "attacker/shell:latest".into(),
            running: true,
        };
        Box::pin(async move { Ok(identity) })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn healthy_endpoint_on_a_replaced_container_is_not_fixed() -> Result<()> {
    init_tracing();
    let agent = MockAgentServer::start(AgentScript::new(lockfile_fix_events())).await?;
    let target = MockTarget::healthy("stale_lockfile").await?;

    let config = agent_builder(1, agent.url(), target.url())
        .one_shot(1)
        .scenarios(vec![Scenario::StaleLockfile])
        .target_container("svc")
        .expected_image("demo/svc:1")
        .build()?;
    let runner = RemediationRunner::from_config(&config)?;
    let verifier = StabilityVerifier::new(Arc::new(HttpHealthProbe::new(
        std::time::Duration::from_secs(2),
    )?))
    .with_inspector(Arc::new(ReplacedContainer));
    let report = Dispatcher::new(config, runner)
        .with_verifier(verifier)
        .run()
        .await?;

    let record = &report.records[0];
    assert!(!record.service_up);
    let verification = record.verification.as_ref().expect("verification ran");
    assert!(!verification.verified);
    assert_eq!(
        verification.last_failure.as_deref(),
        Some("container svc runs image attacker/shell:latest instead of demo/svc:1")
    );
    let tasks = agent.script().tasks();
    assert!(tasks[0].contains("Target container: svc"));
    assert!(tasks[0].contains("keep it running image demo/svc:1"));

    agent.shutdown().await;
    target.shutdown().await;
    Ok(())
}
