//! Streak-based health verification.
//!
//! A poll only counts as healthy when the endpoint answers 200 with a JSON
//! content type, the body parses as JSON, `status == "ok"` and `scenario`
//! matches the expected identifier. Any other poll resets the streak.

use super::container::{ContainerIdentity, ContainerInspector};
use super::probe::{HealthProbe, ProbeResponse};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_CONSECUTIVE_SUCCESSES: usize = 3;
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Attempt code recorded when the probe never got an HTTP response.
pub const TRANSPORT_FAILURE_CODE: &str = "ERR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationSettings {
    pub consecutive_successes: usize,
    pub max_attempts: usize,
    pub interval: Duration,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            consecutive_successes: DEFAULT_CONSECUTIVE_SUCCESSES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl VerificationSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.consecutive_successes == 0 {
            bail!("verification consecutive_successes must be greater than 0");
        }
        if self.max_attempts < self.consecutive_successes {
            bail!("verification max_attempts must be at least consecutive_successes");
        }
        if self.interval.is_zero() {
            bail!("verification interval must be greater than 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    /// One entry per poll: the HTTP status code, or `ERR` for transport failures.
    pub attempts: Vec<String>,
    pub last_failure: Option<String>,
}

#[derive(Clone)]
pub struct StabilityVerifier {
    probe: Arc<dyn HealthProbe>,
    inspector: Option<Arc<dyn ContainerInspector>>,
}

impl StabilityVerifier {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            probe,
            inspector: None,
        }
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn ContainerInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub async fn verify(
        &self,
        url: &str,
        expected_scenario: &str,
        settings: &VerificationSettings,
    ) -> VerificationResult {
        let mut attempts = Vec::with_capacity(settings.max_attempts);
        let mut last_failure = None;
        let mut streak = 0usize;

        for poll in 1..=settings.max_attempts {
            match self.probe.probe(url).await {
                Ok(response) => {
                    attempts.push(response.status.to_string());
                    match evaluate_response(&response, expected_scenario) {
                        Ok(()) => streak += 1,
                        Err(reason) => {
                            streak = 0;
                            last_failure = Some(reason);
                        }
                    }
                }
                Err(err) => {
                    attempts.push(TRANSPORT_FAILURE_CODE.to_owned());
                    streak = 0;
                    last_failure = Some(format!("request failed: {err:#}"));
                }
            }

            if streak >= settings.consecutive_successes {
                tracing::debug!(url, polls = poll, "service verified stable");
                return VerificationResult {
                    verified: true,
                    attempts,
                    last_failure,
                };
            }

            if poll < settings.max_attempts {
                sleep(settings.interval).await;
            }
        }

        tracing::debug!(
            url,
            polls = attempts.len(),
            last_failure = last_failure.as_deref().unwrap_or_default(),
            "service did not stabilise"
        );
        VerificationResult {
            verified: false,
            attempts,
            last_failure,
        }
    }

    /// Confirms the repaired container still runs `expected_image`, when one is given.
    pub async fn verify_identity(
        &self,
        container: &str,
        expected_image: Option<&str>,
    ) -> Result<ContainerIdentity, String> {
        let Some(inspector) = &self.inspector else {
            return Err("no container inspector configured".to_owned());
        };
        let identity = inspector
            .inspect(container)
            .await
            .map_err(|err| format!("failed to inspect container {container}: {err:#}"))?;

        if !identity.running {
            return Err(format!("container {container} is not running"));
        }
        if let Some(expected) = expected_image {
            if identity.image != expected {
                return Err(format!(
                    "container {container} runs image {} instead of {expected}",
                    identity.image
                ));
            }
        }
        Ok(identity)
    }
}

/// Returns `Ok(())` when a single poll is healthy, otherwise the failure reason.
pub fn evaluate_response(response: &ProbeResponse, expected_scenario: &str) -> Result<(), String> {
    if response.status != 200 {
        return Err(format!("HTTP {}", response.status));
    }

    let content_type = response
        .content_type
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !content_type.contains("json") {
        return Err(format!("content-type '{content_type}' is not JSON"));
    }

    let payload: Value = serde_json::from_str(&response.body)
        .map_err(|err| format!("body is not valid JSON: {err}"))?;

    let status = payload.get("status").and_then(Value::as_str);
    if status != Some("ok") {
        return Err(format!("status field is {}", describe(status)));
    }

    let scenario = payload.get("scenario").and_then(Value::as_str);
    if scenario != Some(expected_scenario) {
        return Err(format!(
            "scenario field is {} but expected '{expected_scenario}'",
            describe(scenario)
        ));
    }

    Ok(())
}

fn describe(field: Option<&str>) -> String {
    field
        .map(|value| format!("'{value}'"))
        .unwrap_or_else(|| "missing".to_owned())
}
