use serde::{Deserialize, Serialize};
use std::fmt;

/// Security risk reported for a single tool action, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Parses agent-reported labels such as `HIGH`, `medium` or `SecurityRisk.LOW`.
    /// Anything unrecognised maps to [`RiskLevel::Unknown`].
    pub fn parse_lenient(label: &str) -> Self {
        let tail = label.rsplit('.').next().unwrap_or(label);
        match tail.trim().to_ascii_uppercase().as_str() {
            "LOW" => RiskLevel::Low,
            "MEDIUM" => RiskLevel::Medium,
            "HIGH" => RiskLevel::High,
            _ => RiskLevel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Unknown => "UNKNOWN",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    /// Highest level in `risks`, or `Unknown` when empty.
    pub fn max_of<'a>(risks: impl IntoIterator<Item = &'a RiskLevel>) -> Self {
        risks.into_iter().copied().max().unwrap_or_default()
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
