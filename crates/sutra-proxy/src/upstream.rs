// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::ProxyError;

/// Delay between upstream retries; kept short because retried requests are
/// already paying the user's latency budget.
const RETRY_DELAY_MS: u64 = 200;

/// Pooled keep-alive HTTP client for upstream providers, with bounded
/// retries on 429/5xx responses.
pub struct UpstreamClient {
    client: reqwest::Client,
    max_retries: u32,
}

impl UpstreamClient {
    pub fn new(timeout_ms: u64, max_retries: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_retries,
        }
    }

    /// POST a JSON body.  Returns the raw response so the caller can either
    /// decode it or pipe the byte stream.
    pub async fn post(
        &self,
        url: &str,
        api_key: Option<&str>,
        body: &Value,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut attempt = 0u32;
        loop {
            let mut req = self.client.post(url).json(body);
            if let Some(key) = api_key {
                req = req.bearer_auth(key);
            }
            let result = req.send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if retryable && attempt < self.max_retries {
                        attempt += 1;
                        debug!(%status, attempt, "retrying upstream request");
                        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64))
                            .await;
                        continue;
                    }
                    let text = resp.text().await.unwrap_or_default();
                    warn!(%status, "upstream request failed");
                    return Err(ProxyError::UpstreamStatus {
                        status: status.as_u16(),
                        body: text,
                    });
                }
                Err(e) if e.is_timeout() => return Err(ProxyError::UpstreamTimeout),
                Err(e) => {
                    if attempt < self.max_retries {
                        attempt += 1;
                        debug!(error = %e, attempt, "retrying after connect error");
                        tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64))
                            .await;
                        continue;
                    }
                    return Err(ProxyError::UpstreamUnreachable(e.to_string()));
                }
            }
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unreachable_upstream_errors_after_retries() {
        let client = UpstreamClient::new(1_000, 1);
        let err = client
            .post("http://127.0.0.1:9/v1/none", None, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::UpstreamUnreachable(_) | ProxyError::UpstreamTimeout
        ));
    }
}
