use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure modes the remediation backends know how to repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    StaleLockfile,
    BadEnvConfig,
    ReadinessProbeFail,
    PortMismatch,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::StaleLockfile,
        Scenario::BadEnvConfig,
        Scenario::ReadinessProbeFail,
        Scenario::PortMismatch,
    ];

    /// Stable identifier reported by the target service in its health payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::StaleLockfile => "stale_lockfile",
            Scenario::BadEnvConfig => "bad_env_config",
            Scenario::ReadinessProbeFail => "readiness_probe_fail",
            Scenario::PortMismatch => "port_mismatch",
        }
    }

    /// Incident report text handed to execution backends.
    pub fn description(&self) -> &'static str {
        match self {
            Scenario::StaleLockfile => {
                "Service at localhost:5000 returns HTTP 500 after a previous crash."
            }
            Scenario::BadEnvConfig => {
                "Service at localhost:5000 fails with missing REQUIRED_API_KEY."
            }
            Scenario::ReadinessProbeFail => {
                "Service startup passes but readiness probe stays unhealthy due to missing ready flag."
            }
            Scenario::PortMismatch => {
                "Service probe on :5000 fails; process may be listening on a different port."
            }
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown scenario `{0}`")]
pub struct UnknownScenario(pub String);

impl FromStr for Scenario {
    type Err = UnknownScenario;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == normalized)
            .ok_or(UnknownScenario(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// Ordering key; higher ranks are dispatched first.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

    /// Relative sampling weight used by the generator.
    pub(crate) fn weight(&self) -> u32 {
        match self {
            Severity::Critical => 1,
            Severity::High => 2,
            Severity::Medium => 4,
            Severity::Low => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of remediation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub scenario: Scenario,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    pub fn new(id: impl Into<String>, scenario: Scenario, severity: Severity) -> Self {
        Self {
            id: id.into(),
            scenario,
            severity,
            created_at: Utc::now(),
        }
    }

    /// Description passed to the execution backend for this incident.
    pub fn description(&self) -> String {
        format!(
            "[{}] {} severity incident {}: {}",
            self.scenario,
            self.severity,
            self.id,
            self.scenario.description()
        )
    }
}
