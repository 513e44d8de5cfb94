use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use remediator::{
    DispatchConfig, DispatchReport, Dispatcher, FanoutSupervisor, Scenario, StrategyKind,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_INCIDENTS: usize = 20;
const DEFAULT_SEED: u64 = 7;
const DEFAULT_STRATEGY: &str = "skills";
const DEFAULT_TARGET_URL: &str = "http://127.0.0.1:15000/health";
const DEFAULT_LATENCY_MS: u64 = 150;
const DEFAULT_LOG_DIRECTIVE: &str = "warn";
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let bar = build_progress_bar();
    bar.println(args.describe());

    let supervisor = FanoutSupervisor::new(Dispatcher::from_config(args.to_dispatch_config()?)?);
    let progress_handle = spawn_progress(supervisor.dispatcher(), bar.clone());

    let result = supervisor.run_until_ctrl_c().await;
    progress_handle.abort();
    match result {
        Ok(report) => {
            bar.finish_with_message(report.status.to_string());
            print_summary(&bar, &report);
            Ok(())
        }
        Err(err) => {
            bar.finish_with_message("dispatch aborted");
            Err(err)
        }
    }
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    remediator::init_tracing();
}

fn build_progress_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(1), ProgressDrawTarget::stdout_with_hz(12));
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} incidents ({per_sec:.2} inc/s) {msg}",
    )
    .expect("valid progress bar template")
    .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn spawn_progress(dispatcher: Arc<Dispatcher>, bar: ProgressBar) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let summary = dispatcher.state().summary();
            bar.set_length(summary.total.max(1) as u64);
            bar.set_position(summary.completed as u64);
            bar.set_message(format!(
                "queued {} active {} fixed {} failed {}",
                summary.queued, summary.active, summary.fixed, summary.failed
            ));
            sleep(PROGRESS_POLL_INTERVAL).await;
        }
    })
}

fn print_summary(bar: &ProgressBar, report: &DispatchReport) {
    let summary = &report.summary;
    bar.println(format!(
        "Run {} {}: {}/{} completed, {} fixed, {} failed, {} fallbacks in {:.2}s [{:.2} incidents/s]",
        report.run_id,
        report.status,
        summary.completed,
        summary.total,
        summary.fixed,
        summary.failed,
        summary.fallback_count,
        summary.elapsed_s,
        summary.throughput_per_s
    ));
    bar.println(format!(
        "avg steps {:.2}, avg latency {:.3}s, peak active {}",
        summary.avg_steps, summary.avg_latency_s, summary.peak_active
    ));
    if let Some(session) = &report.agent_session {
        bar.println(format!(
            "agent session: {} requests, {} errors, {} timeouts, {:.2}ms avg",
            session.total_requests,
            session.total_errors,
            session.total_timeouts,
            session.average_latency_ms
        ));
    }
    for (worker, completed) in &summary.per_worker {
        bar.println(format!("  worker {worker}: {completed} incidents"));
    }
    for (scenario, completed) in &summary.per_scenario {
        bar.println(format!("  {scenario}: {completed} incidents"));
    }
}

struct ExampleArgs {
    concurrency: usize,
    incidents: usize,
    continuous_secs: Option<u64>,
    arrival_rate: f64,
    seed: u64,
    strategy: StrategyKind,
    scenarios: Vec<Scenario>,
    agent_url: Option<String>,
    target_url: String,
    allow_fallback: bool,
    latency_ms: u64,
    trace_path: Option<String>,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        let concurrency =
            parse_env_with_default::<usize>("REMEDIATOR_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        let incidents = parse_env_with_default::<usize>("REMEDIATOR_INCIDENTS", DEFAULT_INCIDENTS)?;
        let continuous_secs = parse_env_with_default::<u64>("REMEDIATOR_CONTINUOUS_SECS", 0)?;
        let arrival_rate = parse_env_with_default::<f64>("REMEDIATOR_ARRIVAL_RATE", 1.0)?;
        let seed = parse_env_with_default::<u64>("REMEDIATOR_SEED", DEFAULT_SEED)?;
        let strategy = read_env_or_default("REMEDIATOR_STRATEGY", DEFAULT_STRATEGY)
            .parse::<StrategyKind>()
            .context("failed to parse REMEDIATOR_STRATEGY")?;
        let scenarios = match env::var("REMEDIATOR_SCENARIOS") {
            Ok(value) if !value.trim().is_empty() => value
                .split(',')
                .map(|name| name.parse::<Scenario>())
                .collect::<Result<Vec<_>, _>>()
                .context("failed to parse REMEDIATOR_SCENARIOS")?,
            _ => Scenario::ALL.to_vec(),
        };
        let agent_url = env::var("REMEDIATOR_AGENT_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let target_url = read_env_or_default("REMEDIATOR_TARGET_URL", DEFAULT_TARGET_URL);
        let allow_fallback = parse_env_with_default::<bool>("REMEDIATOR_ALLOW_FALLBACK", true)?;
        let latency_ms = parse_env_with_default::<u64>("REMEDIATOR_LATENCY_MS", DEFAULT_LATENCY_MS)?;
        let trace_path = env::var("REMEDIATOR_TRACE_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());

        ensure!(
            concurrency > 0,
            "REMEDIATOR_CONCURRENCY must be greater than 0"
        );
        ensure!(
            arrival_rate > 0.0,
            "REMEDIATOR_ARRIVAL_RATE must be greater than 0"
        );

        Ok(Self {
            concurrency,
            incidents,
            continuous_secs: (continuous_secs > 0).then_some(continuous_secs),
            arrival_rate,
            seed,
            strategy,
            scenarios,
            agent_url,
            target_url,
            allow_fallback,
            latency_ms,
            trace_path,
        })
    }

    fn describe(&self) -> String {
        let backend = self.agent_url.as_deref().unwrap_or("simulation");
        match self.continuous_secs {
            Some(secs) => format!(
                "Continuous dispatch for {secs}s at {:.2} incidents/s with {} workers against {backend}",
                self.arrival_rate, self.concurrency
            ),
            None => format!(
                "Dispatching {} incidents with {} workers against {backend}",
                self.incidents, self.concurrency
            ),
        }
    }

    fn to_dispatch_config(&self) -> Result<DispatchConfig> {
        let mut builder = DispatchConfig::builder()
            .concurrency(self.concurrency)
            .seed(self.seed)
            .strategy(self.strategy)
            .scenarios(self.scenarios.clone())
            .target_url(self.target_url.clone())
            .allow_fallback(self.allow_fallback)
            .simulate(self.agent_url.is_none())
            .simulate_latency(Duration::from_millis(self.latency_ms));

        builder = match self.continuous_secs {
            Some(secs) => builder.continuous(Duration::from_secs(secs), self.arrival_rate),
            None => builder.one_shot(self.incidents),
        };
        if let Some(url) = &self.agent_url {
            builder = builder.agent_url(url.clone());
        }
        if let Some(path) = &self.trace_path {
            builder = builder.trace_path(path);
        }
        builder.build()
    }
}

fn read_env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
