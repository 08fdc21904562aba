//! JSON-over-HTTP with bounded retry, shared by the remote providers.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Build a client whose every request times out after `timeout_secs`.
pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// A JSON POST to one endpoint of one service.
pub struct JsonPost<'a> {
    /// Service name used in error messages (e.g. `"OpenAI"`).
    pub service: &'a str,
    pub url: String,
    pub bearer: Option<&'a str>,
    pub body: &'a serde_json::Value,
    pub max_retries: u32,
}

impl JsonPost<'_> {
    /// Send the request, retrying transient failures, and return the
    /// response body parsed as JSON.
    pub async fn send(&self, client: &reqwest::Client) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(service = self.service, attempt, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let mut req = client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(self.body);
            if let Some(key) = self.bearer {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(service = self.service, %status, attempt, "transient API error");
                        last_err = Some(anyhow!("{} API error {}: {}", self.service, status, body_text));
                        continue;
                    }

                    bail!("{} API error {}: {}", self.service, status, body_text);
                }
                Err(e) => {
                    warn!(service = self.service, attempt, error = %e, "request failed");
                    last_err = Some(anyhow!(
                        "{} connection error ({}): {}",
                        self.service,
                        self.url,
                        e
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", self.service)))
    }
}

/// Read the `OPENAI_API_KEY` environment variable.
pub fn openai_api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))
}

/// Join a base URL and an absolute endpoint path.
pub fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let secs: Vec<u64> = (1..=8).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 32, 32]);
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("http://localhost:11434/", "/api/embed"),
            "http://localhost:11434/api/embed"
        );
        assert_eq!(
            endpoint("https://api.openai.com", "/v1/embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_after_retries() {
        let client = client(1).unwrap();
        let body = serde_json::json!({});
        let err = JsonPost {
            service: "Test",
            url: "http://127.0.0.1:9/none".to_string(),
            bearer: None,
            body: &body,
            max_retries: 0,
        }
        .send(&client)
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Test connection error"));
    }
}
