//! REST client for the ComfyUI `/prompt` endpoint.
//!
//! Wraps job submission using [`reqwest`]. Gateway errors (502/503/504)
//! are retried with exponential backoff according to a [`RetryPolicy`];
//! every other failure is returned to the caller immediately.

use std::time::Duration;

use serde::Deserialize;

/// Status codes that indicate a transient proxy or gateway failure.
pub const RETRY_STATUSES: [u16; 3] = [502, 503, 504];

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Retry configuration for submission requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff_base: Duration,
    /// Response statuses that trigger a retry.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_base: Duration::from_millis(100),
            retry_statuses: RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), clamped to two minutes.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }

    fn should_retry(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }
}

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    retry: RetryPolicy,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, timeout, bad JSON).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code that is not retried.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A retryable status persisted through every attempt.
    #[error("ComfyUI API still returning {status} after {attempts} attempts")]
    RetriesExhausted { status: u16, attempts: u32 },
}

impl ComfyUIApi {
    /// Create an API client with its own connection pool.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    /// * `timeout` - Per-request timeout covering the whole exchange.
    pub fn new(api_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self::with_client(client, api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    ///
    /// The client is expected to be built once at process start.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the default retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Queue a job request.
    ///
    /// The request body is sent verbatim as `POST /prompt`; it already
    /// carries the workflow and the `client_id`.
    pub async fn submit(
        &self,
        request: &serde_json::Value,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let url = format!("{}/prompt", self.api_url);
        let mut retries = 0u32;

        loop {
            let response = self.client.post(&url).json(request).send().await?;
            let status = response.status().as_u16();

            if !self.retry.should_retry(status) {
                return Self::parse_response(response).await;
            }

            if retries >= self.retry.max_retries {
                tracing::error!(status, attempts = retries + 1, "Submission retries exhausted");
                return Err(ComfyUIApiError::RetriesExhausted {
                    status,
                    attempts: retries + 1,
                });
            }

            retries += 1;
            let delay = self.retry.backoff(retries);
            tracing::warn!(
                status,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                "ComfyUI gateway error, retrying submission",
            );
            tokio::time::sleep(delay).await;
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
