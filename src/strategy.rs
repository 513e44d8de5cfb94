//! Strategy hints handed to execution backends.
//!
//! Choosing or optimising a strategy is outside this crate; the dispatcher only
//! asks a [`StrategySource`] for a hint per incident.

use crate::incident::Scenario;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub const BASELINE_HINT: &str = "Fix the bug.";
pub const RUNBOOK_HINT: &str = "Follow an incident-first runbook: check /tmp/service.lock and \
     /tmp/ready.flag, verify REQUIRED_API_KEY, check active listening ports with ss -lntp, apply \
     the minimal corrective action, and re-verify with curl localhost:5000.";

pub trait StrategySource: Send + Sync {
    fn strategy_hint(&self, scenario: Scenario, incident_report: &str) -> String;
}

/// Same hint for every incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedStrategy(pub String);

impl StrategySource for FixedStrategy {
    fn strategy_hint(&self, _scenario: Scenario, _incident_report: &str) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Skill {
    pub id: &'static str,
    pub hint: &'static str,
}

const STALE_LOCKFILE: Skill = Skill {
    id: "stale-lockfile",
    hint: "Apply the stale-lockfile skill runbook: inspect /tmp/service.lock under /tmp, remove \
           stale lockfile, and verify with curl.",
};
const BAD_ENV_CONFIG: Skill = Skill {
    id: "bad-env-config",
    hint: "Apply the bad-env-config skill runbook: validate REQUIRED_API_KEY env config, apply \
           minimal fix, and verify with curl.",
};
const READINESS_PROBE_FAIL: Skill = Skill {
    id: "readiness-probe-fail",
    hint: "Apply the readiness-probe-fail skill runbook: check /tmp/ready.flag readiness signal, \
           restore readiness state, and verify with curl.",
};
const PORT_MISMATCH: Skill = Skill {
    id: "port-mismatch",
    hint: "Apply the port-mismatch skill runbook: inspect ports 5000 and 5001, correct bind/probe \
           mismatch, and verify with curl.",
};

/// Report keywords consulted, in order, when no scenario is known.
const KEYWORD_ROUTES: [(&str, Skill); 7] = [
    ("lock", STALE_LOCKFILE),
    ("required_api_key", BAD_ENV_CONFIG),
    ("missing env", BAD_ENV_CONFIG),
    ("ready.flag", READINESS_PROBE_FAIL),
    ("readiness", READINESS_PROBE_FAIL),
    ("port", PORT_MISMATCH),
    ("5001", PORT_MISMATCH),
];

/// Per-scenario skill runbooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkillCatalog;

impl SkillCatalog {
    pub fn for_scenario(scenario: Scenario) -> Skill {
        match scenario {
            Scenario::StaleLockfile => STALE_LOCKFILE,
            Scenario::BadEnvConfig => BAD_ENV_CONFIG,
            Scenario::ReadinessProbeFail => READINESS_PROBE_FAIL,
            Scenario::PortMismatch => PORT_MISMATCH,
        }
    }

    /// Routes a free-form incident report to a skill; defaults to the lockfile runbook.
    pub fn for_report(report: &str) -> Skill {
        let report = report.to_ascii_lowercase();
        KEYWORD_ROUTES
            .iter()
            .find(|(needle, _)| report.contains(needle))
            .map(|(_, skill)| *skill)
            .unwrap_or(STALE_LOCKFILE)
    }
}

impl StrategySource for SkillCatalog {
    fn strategy_hint(&self, scenario: Scenario, _incident_report: &str) -> String {
        Self::for_scenario(scenario).hint.to_owned()
    }
}

/// How the dispatcher picks hints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Baseline,
    Runbook,
    #[default]
    Skills,
}

impl StrategyKind {
    pub fn source(&self) -> Arc<dyn StrategySource> {
        match self {
            StrategyKind::Baseline => Arc::new(FixedStrategy(BASELINE_HINT.to_owned())),
            StrategyKind::Runbook => Arc::new(FixedStrategy(RUNBOOK_HINT.to_owned())),
            StrategyKind::Skills => Arc::new(SkillCatalog),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(StrategyKind::Baseline),
            "runbook" | "optimized" => Ok(StrategyKind::Runbook),
            "skills" => Ok(StrategyKind::Skills),
            other => anyhow::bail!("unknown strategy `{other}`"),
        }
    }
}
