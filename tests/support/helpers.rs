use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use remediator::{DispatchConfig, DispatchConfigBuilder, Dispatcher, RunRecord, VerificationSettings};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Simulate-mode config with fast defaults.
pub fn simulated_builder(concurrency: usize) -> DispatchConfigBuilder {
    DispatchConfig::builder()
        .concurrency(concurrency)
        .simulate(true)
        .metrics_interval(Duration::from_millis(100))
}

/// Real-mode config pointed at mock servers, with millisecond back-off and polling.
pub fn agent_builder(concurrency: usize, agent_url: &str, target_url: &str) -> DispatchConfigBuilder {
    DispatchConfig::builder()
        .concurrency(concurrency)
        .agent_url(agent_url)
        .target_url(target_url)
        .backoff_unit(Duration::from_millis(10))
        .run_timeout(Duration::from_secs(10))
        .metrics_interval(Duration::from_millis(100))
        .verification(fast_verification(2, 4))
}

pub fn fast_verification(streak: usize, max_attempts: usize) -> VerificationSettings {
    VerificationSettings {
        consecutive_successes: streak,
        max_attempts,
        interval: Duration::from_millis(10),
    }
}

pub async fn wait_for_completed(
    dispatcher: &Dispatcher,
    target: usize,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let completed = dispatcher.snapshot().summary.completed;
        if completed >= target {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("dispatcher did not complete {target} incidents within {timeout:?} (completed: {completed})");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub fn assert_unique_trace_keys(records: &[RunRecord]) {
    let mut keys: Vec<&str> = records.iter().map(|record| record.trace_key.as_str()).collect();
    keys.sort_unstable();
    let before = keys.len();
    keys.dedup();
    assert_eq!(before, keys.len(), "trace keys must be unique per completion");
}
