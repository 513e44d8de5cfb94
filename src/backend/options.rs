//! Tunables for the agent session transport and the run loop built on top of it.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_RESPONSE_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 64;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct AgentClientOptions {
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_concurrent_requests: usize,
    pub max_response_body_bytes: usize,
}

impl Default for AgentClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_response_body_bytes: DEFAULT_RESPONSE_BODY_LIMIT_BYTES,
        }
    }
}

impl AgentClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }
        if self.max_concurrent_requests == 0 {
            bail!("max_concurrent_requests must be greater than 0");
        }
        if self.max_response_body_bytes == 0 {
            bail!("max_response_body_bytes must be greater than 0");
        }
        Ok(())
    }
}
