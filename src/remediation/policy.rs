use crate::backend::{Outcome, RiskLevel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits applied to the actions a real backend took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub max_security_risk: RiskLevel,
    pub require_confirmation_for_risk: Option<RiskLevel>,
    pub auto_confirm: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            max_security_risk: RiskLevel::High,
            require_confirmation_for_risk: None,
            auto_confirm: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("Security policy violation: max risk seen {seen} exceeds allowed {allowed}")]
    RiskCeilingExceeded { seen: RiskLevel, allowed: RiskLevel },
    #[error(
        "Security policy violation: confirmation required for {threshold} risk actions and auto-confirm is disabled"
    )]
    ConfirmationRequired { threshold: RiskLevel },
}

impl SecurityPolicy {
    /// Checks `outcome` against the policy and records whether confirmation was needed.
    pub fn enforce(&self, outcome: &mut Outcome) -> Result<(), PolicyViolation> {
        if outcome.max_security_risk_seen > self.max_security_risk {
            return Err(PolicyViolation::RiskCeilingExceeded {
                seen: outcome.max_security_risk_seen,
                allowed: self.max_security_risk,
            });
        }

        let Some(threshold) = self.require_confirmation_for_risk else {
            outcome.confirmation_required = false;
            return Ok(());
        };

        let required = outcome.security_risks.iter().any(|risk| *risk >= threshold);
        outcome.confirmation_required = required;
        if required && !self.auto_confirm {
            return Err(PolicyViolation::ConfirmationRequired { threshold });
        }
        Ok(())
    }
}
