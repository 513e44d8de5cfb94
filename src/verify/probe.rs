use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::time::Duration;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw response captured from one health poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

pub trait HealthProbe: Send + Sync {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ProbeResponse>>;
}

/// HTTP GET probe backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build health probe HTTP client")?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<ProbeResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read body from {url}"))?;
        Ok(ProbeResponse {
            status,
            content_type,
            body,
        })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<ProbeResponse>> {
        Box::pin(self.get(url))
    }
}
