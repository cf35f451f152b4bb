//! Shared plumbing for the HTTP clients of external services.
//!
//! Responses are classified into [`ExternalError`] so steps can apply their
//! retry policy. Connection-level failures also get a couple of quick
//! in-call retries with exponential backoff before being reported.

use std::time::Duration;

use backon::ExponentialBuilder;
use reqwest::StatusCode;

use crate::process::ExternalError;

/// In-call retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_times: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_times: 2,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// No in-call retries; every failure is reported straight away
    pub fn none() -> Self {
        Self {
            max_times: 0,
            ..Self::default()
        }
    }

    pub fn strategy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times)
    }
}

pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ExternalError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ExternalError::permanent(format!("cannot build HTTP client: {e}")))
}

/// Map a transport failure. Everything short of a malformed request is
/// worth retrying.
pub fn classify_transport(service: &str, err: &reqwest::Error) -> ExternalError {
    if err.is_builder() {
        ExternalError::permanent(format!("{service}: invalid request: {err}"))
    } else {
        ExternalError::temporary(format!("{service}: request failed: {err}"))
    }
}

/// Map a non-success status. 5xx, 429 and 408 are temporary.
pub fn classify_status(service: &str, status: StatusCode, body: &str) -> ExternalError {
    let message = format!("{service}: HTTP {} - {}", status.as_u16(), body.trim());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        ExternalError::temporary(message)
    } else {
        ExternalError::permanent(message)
    }
}
