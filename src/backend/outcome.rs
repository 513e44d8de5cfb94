use super::risk::RiskLevel;
use serde::{Deserialize, Serialize};

/// Result of a single remediation attempt.
///
/// `security_risks` carries one entry per element of `tool_actions`, and
/// `max_security_risk_seen` is always the maximum of that list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub service_up: bool,
    pub step_count: usize,
    pub tool_actions: Vec<String>,
    pub events: Vec<String>,
    pub security_risks: Vec<RiskLevel>,
    pub max_security_risk_seen: RiskLevel,
    pub confirmation_required: bool,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
    pub raw_output: String,
}

impl Outcome {
    /// Marks this outcome as the product of a fallback after a failed primary attempt.
    pub(crate) fn into_fallback(mut self, reason: impl Into<String>) -> Self {
        self.fallback_used = true;
        self.fallback_reason = Some(reason.into());
        self
    }
}
