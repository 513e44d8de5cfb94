use crate::backend::agent::{DEFAULT_RUN_TIMEOUT, DEFAULT_WORKING_DIR};
use crate::backend::simulated::DEFAULT_TARGET_URL;
use crate::incident::Scenario;
use crate::remediation::policy::SecurityPolicy;
use crate::remediation::retry::{DEFAULT_BACKOFF_UNIT, DEFAULT_MAX_RETRIES};
use crate::remediation::RunnerOptions;
use crate::runtime::telemetry;
use crate::strategy::StrategyKind;
use crate::verify::VerificationSettings;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SEED: u64 = 7;
const DEFAULT_ONE_SHOT_INCIDENTS: usize = 20;
const DEFAULT_COMPLETED_RETENTION: usize = 400;
/// Arrival rates below this are scheduled at this rate.
pub const MIN_ARRIVAL_RATE: f64 = 0.1;

/// How incidents enter the queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchMode {
    /// A single seeded batch, dispatched most severe first.
    OneShot { incidents: usize },
    /// Incidents arrive at `arrival_rate` per second until `duration` elapses.
    Continuous { duration: Duration, arrival_rate: f64 },
}

impl DispatchMode {
    /// Interval between continuous arrivals, with the rate floored at [`MIN_ARRIVAL_RATE`].
    pub fn arrival_interval(arrival_rate: f64) -> Duration {
        Duration::from_secs_f64(1.0 / arrival_rate.max(MIN_ARRIVAL_RATE))
    }
}

/// Runtime configuration for the remediation dispatcher.
///
/// All instances must be constructed via [`DispatchConfig::builder`] or [`DispatchConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    concurrency: usize,
    mode: DispatchMode,
    seed: u64,
    scenarios: Vec<Scenario>,
    strategy: StrategyKind,
    simulate: bool,
    allow_fallback: bool,
    policy: SecurityPolicy,
    max_retries: usize,
    backoff_unit: Duration,
    run_timeout: Duration,
    agent_url: Option<String>,
    agent_api_key: Option<String>,
    agent_working_dir: String,
    target_url: String,
    target_container: Option<String>,
    expected_image: Option<String>,
    verification: VerificationSettings,
    completed_retention: usize,
    metrics_interval: Duration,
    simulate_latency: Duration,
    trace_path: Option<PathBuf>,
}

pub struct DispatchConfigParams {
    pub concurrency: usize,
    pub mode: DispatchMode,
    pub seed: u64,
    pub scenarios: Vec<Scenario>,
    pub strategy: StrategyKind,
    pub simulate: bool,
    pub allow_fallback: bool,
    pub policy: SecurityPolicy,
    pub max_retries: usize,
    pub backoff_unit: Duration,
    pub run_timeout: Duration,
    pub agent_url: Option<String>,
    pub agent_api_key: Option<String>,
    pub agent_working_dir: String,
    pub target_url: String,
    pub target_container: Option<String>,
    pub expected_image: Option<String>,
    pub verification: VerificationSettings,
    pub completed_retention: usize,
    pub metrics_interval: Duration,
    pub simulate_latency: Duration,
    pub trace_path: Option<PathBuf>,
}

impl DispatchConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: DispatchConfigParams) -> Result<Self> {
        let DispatchConfigParams {
            concurrency,
            mode,
            seed,
            scenarios,
            strategy,
            simulate,
            allow_fallback,
            policy,
            max_retries,
            backoff_unit,
            run_timeout,
            agent_url,
            agent_api_key,
            agent_working_dir,
            target_url,
            target_container,
            expected_image,
            verification,
            completed_retention,
            metrics_interval,
            simulate_latency,
            trace_path,
        } = params;

        let config = Self {
            concurrency,
            mode,
            seed,
            scenarios,
            strategy,
            simulate,
            allow_fallback,
            policy,
            max_retries,
            backoff_unit,
            run_timeout,
            agent_url: trimmed_option(agent_url),
            agent_api_key: trimmed_option(agent_api_key),
            agent_working_dir: agent_working_dir.trim().to_owned(),
            target_url: target_url.trim().to_owned(),
            target_container: trimmed_option(target_container),
            expected_image: trimmed_option(expected_image),
            verification,
            completed_retention,
            metrics_interval,
            simulate_latency,
            trace_path,
        };

        config.validate()?;
        Ok(config)
    }

    /// Number of concurrent workers.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// One-shot or continuous-arrival dispatch.
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Seed for the incident generator.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Scenarios the generator draws from.
    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// When set, every incident is handled by the simulator (dry run).
    pub fn simulate(&self) -> bool {
        self.simulate
    }

    /// Whether a failed real attempt may be replaced by a simulated outcome.
    pub fn allow_fallback(&self) -> bool {
        self.allow_fallback
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Retries granted to transient backend failures.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Time unit scaled by the linear retry back-off.
    pub fn backoff_unit(&self) -> Duration {
        self.backoff_unit
    }

    /// Wall-clock bound for a single real attempt.
    pub fn run_timeout(&self) -> Duration {
        self.run_timeout
    }

    /// JSON-RPC endpoint of the remote agent server.
    pub fn agent_url(&self) -> Option<&str> {
        self.agent_url.as_deref()
    }

    pub fn agent_api_key(&self) -> Option<&str> {
        self.agent_api_key.as_deref()
    }

    /// Working directory requested for remote sessions.
    pub fn agent_working_dir(&self) -> &str {
        &self.agent_working_dir
    }

    /// Health endpoint of the service under repair.
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn target_container(&self) -> Option<&str> {
        self.target_container.as_deref()
    }

    pub fn expected_image(&self) -> Option<&str> {
        self.expected_image.as_deref()
    }

    pub fn verification(&self) -> &VerificationSettings {
        &self.verification
    }

    /// Number of trailing completions kept in dispatcher snapshots.
    pub fn completed_retention(&self) -> usize {
        self.completed_retention
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Artificial per-incident delay applied in simulate mode.
    pub fn simulate_latency(&self) -> Duration {
        self.simulate_latency
    }

    /// JSONL trace file, when tracing to disk.
    pub fn trace_path(&self) -> Option<&PathBuf> {
        self.trace_path.as_ref()
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            max_retries: self.max_retries,
            backoff_unit: self.backoff_unit,
            allow_fallback: self.allow_fallback,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be greater than 0");
        }

        match self.mode {
            DispatchMode::OneShot { incidents } => {
                if incidents == 0 {
                    bail!("one-shot incident count must be greater than 0");
                }
            }
            DispatchMode::Continuous {
                duration,
                arrival_rate,
            } => {
                if duration.is_zero() {
                    bail!("continuous duration must be greater than 0");
                }
                if !arrival_rate.is_finite() || arrival_rate <= 0.0 {
                    bail!("arrival_rate must be a positive number");
                }
            }
        }

        if self.scenarios.is_empty() {
            bail!("scenarios cannot be empty");
        }

        if self.backoff_unit.is_zero() {
            bail!("backoff_unit must be greater than 0");
        }

        if self.run_timeout.is_zero() {
            bail!("run_timeout must be greater than 0");
        }

        validate_url("target_url", &self.target_url)?;
        if let Some(url) = &self.agent_url {
            validate_url("agent_url", url)?;
        }

        if !self.simulate && self.agent_url.is_none() && !self.allow_fallback {
            bail!("real mode requires agent_url unless allow_fallback is enabled");
        }

        if self.expected_image.is_some() && self.target_container.is_none() {
            bail!("expected_image requires target_container");
        }

        self.verification.validate()?;

        if self.completed_retention == 0 {
            bail!("completed_retention must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct DispatchConfigBuilder {
    concurrency: Option<usize>,
    mode: Option<DispatchMode>,
    seed: Option<u64>,
    scenarios: Option<Vec<Scenario>>,
    strategy: Option<StrategyKind>,
    simulate: Option<bool>,
    allow_fallback: Option<bool>,
    policy: Option<SecurityPolicy>,
    max_retries: Option<usize>,
    backoff_unit: Option<Duration>,
    run_timeout: Option<Duration>,
    agent_url: Option<String>,
    agent_api_key: Option<String>,
    agent_working_dir: Option<String>,
    target_url: Option<String>,
    target_container: Option<String>,
    expected_image: Option<String>,
    verification: Option<VerificationSettings>,
    completed_retention: Option<usize>,
    metrics_interval: Option<Duration>,
    simulate_latency: Option<Duration>,
    trace_path: Option<PathBuf>,
}

impl DispatchConfigBuilder {
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    pub fn one_shot(mut self, incidents: usize) -> Self {
        self.mode = Some(DispatchMode::OneShot { incidents });
        self
    }

    pub fn continuous(mut self, duration: Duration, arrival_rate: f64) -> Self {
        self.mode = Some(DispatchMode::Continuous {
            duration,
            arrival_rate,
        });
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn scenarios(mut self, scenarios: Vec<Scenario>) -> Self {
        self.scenarios = Some(scenarios);
        self
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn simulate(mut self, simulate: bool) -> Self {
        self.simulate = Some(simulate);
        self
    }

    pub fn allow_fallback(mut self, allow: bool) -> Self {
        self.allow_fallback = Some(allow);
        self
    }

    pub fn policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = Some(unit);
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn agent_url(mut self, url: impl Into<String>) -> Self {
        self.agent_url = Some(url.into());
        self
    }

    pub fn agent_api_key(mut self, key: impl Into<String>) -> Self {
        self.agent_api_key = Some(key.into());
        self
    }

    pub fn agent_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.agent_working_dir = Some(dir.into());
        self
    }

    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn target_container(mut self, container: impl Into<String>) -> Self {
        self.target_container = Some(container.into());
        self
    }

    pub fn expected_image(mut self, image: impl Into<String>) -> Self {
        self.expected_image = Some(image.into());
        self
    }

    pub fn verification(mut self, settings: VerificationSettings) -> Self {
        self.verification = Some(settings);
        self
    }

    pub fn completed_retention(mut self, records: usize) -> Self {
        self.completed_retention = Some(records);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn simulate_latency(mut self, latency: Duration) -> Self {
        self.simulate_latency = Some(latency);
        self
    }

    pub fn trace_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<DispatchConfig> {
        let params = DispatchConfigParams {
            concurrency: self.concurrency.context("concurrency is required")?,
            mode: self.mode.unwrap_or(DispatchMode::OneShot {
                incidents: DEFAULT_ONE_SHOT_INCIDENTS,
            }),
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            scenarios: self.scenarios.unwrap_or_else(|| Scenario::ALL.to_vec()),
            strategy: self.strategy.unwrap_or_default(),
            simulate: self.simulate.unwrap_or(false),
            allow_fallback: self.allow_fallback.unwrap_or(false),
            policy: self.policy.unwrap_or_default(),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            backoff_unit: self.backoff_unit.unwrap_or(DEFAULT_BACKOFF_UNIT),
            run_timeout: self.run_timeout.unwrap_or(DEFAULT_RUN_TIMEOUT),
            agent_url: self.agent_url,
            agent_api_key: self.agent_api_key,
            agent_working_dir: self
                .agent_working_dir
                .unwrap_or_else(|| DEFAULT_WORKING_DIR.to_owned()),
            target_url: self
                .target_url
                .unwrap_or_else(|| DEFAULT_TARGET_URL.to_owned()),
            target_container: self.target_container,
            expected_image: self.expected_image,
            verification: self.verification.unwrap_or_default(),
            completed_retention: self
                .completed_retention
                .unwrap_or(DEFAULT_COMPLETED_RETENTION),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            simulate_latency: self.simulate_latency.unwrap_or(Duration::ZERO),
            trace_path: self.trace_path,
        };

        DispatchConfig::new(params)
    }
}

fn trimmed_option(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
