//! Retrying HTTP sends shared by the remote embedding, chat, and speech
//! backends.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Only the request is retried. Once a success status arrives the response
//! is handed back, so a streaming body is never replayed.

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use tracing::warn;

/// Sends the request built by `build` until it succeeds, fails with a
/// non-retryable status, or `max_retries` extra attempts are spent.
///
/// Errors are returned as display strings prefixed with `label`; callers
/// wrap them in their own error type.
pub async fn send_with_retry<F>(label: &str, max_retries: u32, build: F) -> Result<Response, String>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            warn!(attempt, ?delay, "{} request failed, retrying", label);
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = format!("{} API error {}: {}", label, status, body_text);
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(format!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/x", server.uri());
        let err = send_with_retry("Test", 3, || client.post(&url))
            .await
            .unwrap_err();
        assert!(err.contains("400"));
        assert!(err.contains("bad input"));
    }

    #[tokio::test]
    async fn success_is_returned_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let response = send_with_retry("Test", 0, || client.post(&url)).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
    }
}
