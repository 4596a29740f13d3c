//! HTTP transport to the node network (spec.md §6 "External collaborator
//! contracts — HTTP transport").
//!
//! `post(url, jsonBody, requestId) → Promise<JSON>` from the spec becomes an
//! async trait so the dispatcher (`crate::node::dispatcher`) can be tested
//! against an in-memory double instead of real sockets.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        body: &Value,
        request_id: &str,
        timeout: Duration,
    ) -> anyhow::Result<Value>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(
        &self,
        url: &str,
        body: &Value,
        request_id: &str,
        timeout: Duration,
    ) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(url)
            .header("X-Request-Id", request_id)
            .json(body)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}
