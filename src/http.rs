//! Shared HTTP plumbing for external collaborators.
//!
//! Every remote call maps its failure onto [`CollaboratorError`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retryable
//! - any other non-success status → terminal
//! - network errors and timeouts → retryable
//!
//! [`post_json`] additionally retries in place with exponential backoff
//! (1s, 2s, 4s, ... capped at 2^5) before giving up; the agent runner then
//! applies its own, much longer, per-item backoff on top.

use std::time::Duration;

use anyhow::Result;
use radio_cortex_core::error::CollaboratorError;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::debug;

pub fn client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Classify a non-success HTTP status.
pub fn status_error(label: &str, status: StatusCode, body: &str) -> CollaboratorError {
    let msg = if body.is_empty() {
        format!("{} error {}", label, status)
    } else {
        format!("{} error {}: {}", label, status, body)
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollaboratorError::Retryable(msg)
    } else {
        CollaboratorError::Terminal(msg)
    }
}

pub fn transport_error(label: &str, err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Retryable(format!("{} timed out: {}", label, err))
    } else {
        CollaboratorError::Retryable(format!("{} connection error: {}", label, err))
    }
}

/// Send a JSON request built by `request`, retrying transient failures up
/// to `max_retries` times, and return the decoded body.
pub async fn post_json<F>(
    label: &str,
    max_retries: u32,
    request: F,
) -> Result<serde_json::Value, CollaboratorError>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(label, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        CollaboratorError::Terminal(format!(
                            "{} returned invalid JSON: {}",
                            label, e
                        ))
                    });
                }
                let body = response.text().await.unwrap_or_default();
                let err = status_error(label, status, &body);
                if !err.is_retryable() {
                    return Err(err);
                }
                last_err = Some(err);
            }
            Err(e) => last_err = Some(transport_error(label, e)),
        }
    }

    Err(last_err
        .unwrap_or_else(|| CollaboratorError::Retryable(format!("{} failed after retries", label))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(status_error("x", StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error("x", StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!status_error("x", StatusCode::BAD_REQUEST, "").is_retryable());
        assert!(!status_error("x", StatusCode::NOT_FOUND, "").is_retryable());
        assert!(!status_error("x", StatusCode::GONE, "").is_retryable());
    }

    #[test]
    fn test_status_error_message_includes_body() {
        let err = status_error("Groq", StatusCode::UNAUTHORIZED, "bad key");
        assert_eq!(err.to_string(), "Groq error 401 Unauthorized: bad key");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_retryable() {
        let client = client(Duration::from_millis(200)).unwrap();
        let err = post_json("test", 0, || client.post("http://127.0.0.1:9/nothing"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
