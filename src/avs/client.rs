use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::AvsConfig;
use crate::http::{build_client, classify_status, classify_transport, RetryConfig};
use crate::process::ExternalError;

const SERVICE: &str = "avs";

/// Calls against the monitoring evaluation API.
///
/// Both calls treat an already missing evaluation or reference as success.
#[async_trait]
pub trait AvsClient: Send + Sync {
    async fn remove_reference_from_parent_eval(
        &self,
        parent_id: i64,
        evaluation_id: i64,
    ) -> Result<(), ExternalError>;

    async fn delete_evaluation(&self, evaluation_id: i64) -> Result<(), ExternalError>;
}

/// `reqwest`-backed client
pub struct HttpAvsClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    retry: RetryConfig,
}

impl HttpAvsClient {
    pub fn new(config: &AvsConfig) -> Result<Self, ExternalError> {
        Ok(Self {
            http: build_client(Duration::from_secs(config.timeout_secs))?,
            endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn delete(&self, url: &str) -> Result<(), ExternalError> {
        let send = || async {
            let mut request = self.http.delete(url);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| classify_transport(SERVICE, &e))?;

            let status = response.status();
            if status.is_success() || status == StatusCode::NOT_FOUND {
                debug!(url, status = status.as_u16(), "avs delete done");
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(SERVICE, status, &body))
        };

        send.retry(self.retry.strategy())
            .when(ExternalError::is_temporary)
            .notify(|err: &ExternalError, dur: Duration| {
                warn!("avs call failed, retrying in {:?}: {}", dur, err);
            })
            .await
    }
}

#[async_trait]
impl AvsClient for HttpAvsClient {
    async fn remove_reference_from_parent_eval(
        &self,
        parent_id: i64,
        evaluation_id: i64,
    ) -> Result<(), ExternalError> {
        let url = format!("{}/{}/child/{}", self.endpoint, parent_id, evaluation_id);
        self.delete(&url).await
    }

    async fn delete_evaluation(&self, evaluation_id: i64) -> Result<(), ExternalError> {
        let url = format!("{}/{}", self.endpoint, evaluation_id);
        self.delete(&url).await
    }
}

/// Recorded call made against [`MockAvsClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvsCall {
    RemoveReference { parent_id: i64, evaluation_id: i64 },
    DeleteEvaluation { evaluation_id: i64 },
}

/// In-memory client for tests; records calls and can be told to fail
#[derive(Clone, Default)]
pub struct MockAvsClient {
    calls: Arc<Mutex<Vec<AvsCall>>>,
    failures: Arc<Mutex<Vec<(i64, ExternalError)>>>,
}

impl MockAvsClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call touching `evaluation_id` with `error`
    pub fn fail_for(&self, evaluation_id: i64, error: ExternalError) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((evaluation_id, error));
    }

    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    pub fn call_count(&self) -> usize {
        self.recorded().len()
    }

    pub fn recorded(&self) -> Vec<AvsCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: AvsCall, evaluation_id: i64) -> Result<(), ExternalError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(call);
        let failures = self
            .failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match failures.iter().find(|(id, _)| *id == evaluation_id) {
            Some((_, err)) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AvsClient for MockAvsClient {
    async fn remove_reference_from_parent_eval(
        &self,
        parent_id: i64,
        evaluation_id: i64,
    ) -> Result<(), ExternalError> {
        self.record(
            AvsCall::RemoveReference {
                parent_id,
                evaluation_id,
            },
            evaluation_id,
        )
    }

    async fn delete_evaluation(&self, evaluation_id: i64) -> Result<(), ExternalError> {
        self.record(AvsCall::DeleteEvaluation { evaluation_id }, evaluation_id)
    }
}
