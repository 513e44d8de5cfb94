//! JSON-RPC client for a remote tool-execution agent.
//!
//! The agent server exposes a small session protocol:
//!
//! | method | params | result |
//! | --- | --- | --- |
//! | `session.open` | `[working_dir]` | session id |
//! | `session.send_message` | `[session_id, text]` | `true` |
//! | `session.run` | `[session_id]` | `true` |
//! | `session.status` | `[session_id]` | [`SessionStatus`] |
//! | `session.events` | `[session_id]` | `[`[`SessionEvent`]`]` |
//! | `session.close` | `[session_id]` | `true` |
//!
//! Every call is bounded by the per-request timeout and mapped onto a
//! [`BackendError`] with its transient flag already decided.

use super::auth::build_auth_headers;
use super::error::{BackendError, BackendErrorKind};
use super::metrics::{SessionMetrics, SessionMetricsSnapshot};
use super::options::AgentClientOptions;
use anyhow::{anyhow, Result};
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Finished,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Action,
    Observation,
    Message,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: EventKind,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub security_risk: Option<String>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct AgentSessionClient {
    endpoint: Arc<String>,
    client: HttpClient,
    options: AgentClientOptions,
    metrics: Arc<SessionMetrics>,
}

impl AgentSessionClient {
    pub fn new(url: impl Into<String>, api_key: Option<&str>) -> Result<Self> {
        Self::with_options(url, api_key, AgentClientOptions::default())
    }

    pub fn with_options(
        url: impl Into<String>,
        api_key: Option<&str>,
        options: AgentClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let endpoint = url.into();
        let headers = build_auth_headers(api_key)?;
        let max_response_body_size = options.max_response_body_bytes.min(u32::MAX as usize) as u32;

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_response_size(max_response_body_size)
            .build(&endpoint)
            .map_err(|err| anyhow!("failed to build agent session client: {err}"))?;

        Ok(Self {
            endpoint: Arc::new(endpoint),
            client,
            options,
            metrics: Arc::new(SessionMetrics::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn options(&self) -> &AgentClientOptions {
        &self.options
    }

    pub fn metrics(&self) -> SessionMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn open(&self, working_dir: &str) -> Result<String, BackendError> {
        self.call("session.open", rpc_params![working_dir]).await
    }

    pub async fn send_message(&self, session_id: &str, text: &str) -> Result<(), BackendError> {
        self.call::<bool>("session.send_message", rpc_params![session_id, text])
            .await
            .map(|_| ())
    }

    pub async fn start_run(&self, session_id: &str) -> Result<(), BackendError> {
        self.call::<bool>("session.run", rpc_params![session_id])
            .await
            .map(|_| ())
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus, BackendError> {
        self.call("session.status", rpc_params![session_id]).await
    }

    pub async fn events(&self, session_id: &str) -> Result<Vec<SessionEvent>, BackendError> {
        self.call("session.events", rpc_params![session_id]).await
    }

    pub async fn close(&self, session_id: &str) -> Result<(), BackendError> {
        self.call::<bool>("session.close", rpc_params![session_id])
            .await
            .map(|_| ())
    }

    async fn call<R>(&self, method: &'static str, params: ArrayParams) -> Result<R, BackendError>
    where
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let response = timeout(
            self.options.request_timeout,
            self.client.request::<R, _>(method, params),
        )
        .await;

        match response {
            Ok(Ok(value)) => {
                self.metrics.record_success(start.elapsed());
                tracing::trace!(method, "agent session call completed");
                Ok(value)
            }
            Ok(Err(err)) => {
                self.metrics.record_failure(start.elapsed());
                Err(map_session_error(method, err))
            }
            Err(_) => {
                self.metrics.record_timeout(start.elapsed());
                Err(BackendError::classify(
                    BackendErrorKind::Timeout,
                    format!(
                        "agent {method} call timed out after {:?}",
                        self.options.request_timeout
                    ),
                ))
            }
        }
    }
}

fn map_session_error(method: &str, err: JsonRpcError) -> BackendError {
    match err {
        // Transport failures are only transient when the message says so: a
        // reset or dropped connection retries, a refused one does not.
        JsonRpcError::Transport(inner) => BackendError::classify(
            BackendErrorKind::Connectivity,
            format!("agent {method} transport failure: {}", error_chain(inner.as_ref())),
        ),
        JsonRpcError::RestartNeeded(inner) => BackendError::classify(
            BackendErrorKind::Connectivity,
            format!("agent {method} connection lost: {inner}"),
        ),
        JsonRpcError::RequestTimeout => BackendError::classify(
            BackendErrorKind::Timeout,
            format!("agent {method} request timed out"),
        ),
        JsonRpcError::Call(object) => BackendError::classify(
            BackendErrorKind::Session,
            format!(
                "agent {method} failed (code={}, message={})",
                object.code(),
                object.message()
            ),
        ),
        other => BackendError::classify(
            BackendErrorKind::Session,
            format!("agent {method} failed: {other}"),
        ),
    }
}

/// Renders an error with its sources, so markers buried in the cause still match.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
