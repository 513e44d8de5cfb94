//! Header wiring for agent-server credentials.

use anyhow::{Context, Result};
use jsonrpsee::http_client::{HeaderMap, HeaderValue};

pub(crate) const SESSION_API_KEY_HEADER: &str = "X-Session-API-Key";

pub(crate) fn build_auth_headers(api_key: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
        let value =
            HeaderValue::from_str(key).context("failed to build session API key header")?;
        headers.insert(SESSION_API_KEY_HEADER, value);
    }
    Ok(headers)
}
