use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};

use super::{DataTenantPayload, EdpConfig, MetadataTenantPayload};
use crate::http::{build_client, classify_status, classify_transport, RetryConfig};
use crate::process::ExternalError;

const SERVICE: &str = "edp";

/// Tenant registration calls. Creating something that already exists
/// succeeds.
#[async_trait]
pub trait EdpClient: Send + Sync {
    async fn create_data_tenant(&self, payload: DataTenantPayload) -> Result<(), ExternalError>;

    async fn create_metadata_tenant(
        &self,
        name: &str,
        environment: &str,
        payload: MetadataTenantPayload,
    ) -> Result<(), ExternalError>;
}

pub struct HttpEdpClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    retry: RetryConfig,
}

impl HttpEdpClient {
    pub fn new(config: &EdpConfig) -> Result<Self, ExternalError> {
        Ok(Self {
            http: build_client(Duration::from_secs(config.timeout_secs))?,
            base_url: format!(
                "{}/namespaces/{}",
                config.admin_url.trim_end_matches('/'),
                config.namespace
            ),
            token: config.token.clone(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn post<T: Serialize + Sync>(&self, url: &str, payload: &T) -> Result<(), ExternalError> {
        let send = || async {
            let mut request = self.http.post(url).json(payload);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| classify_transport(SERVICE, &e))?;

            let status = response.status();
            if status.is_success() {
                debug!(url, status = status.as_u16(), "edp resource created");
                return Ok(());
            }
            if status == StatusCode::CONFLICT {
                debug!(url, "edp resource already exists");
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(SERVICE, status, &body))
        };

        send.retry(self.retry.strategy())
            .when(ExternalError::is_temporary)
            .notify(|err: &ExternalError, dur: Duration| {
                warn!("edp call failed, retrying in {:?}: {}", dur, err);
            })
            .await
    }
}

#[async_trait]
impl EdpClient for HttpEdpClient {
    async fn create_data_tenant(&self, payload: DataTenantPayload) -> Result<(), ExternalError> {
        let url = format!("{}/dataTenants", self.base_url);
        self.post(&url, &payload).await
    }

    async fn create_metadata_tenant(
        &self,
        name: &str,
        environment: &str,
        payload: MetadataTenantPayload,
    ) -> Result<(), ExternalError> {
        let url = format!(
            "{}/dataTenants/{}/{}/metadata",
            self.base_url, name, environment
        );
        self.post(&url, &payload).await
    }
}

/// Recorded call made against [`MockEdpClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdpCall {
    DataTenant(DataTenantPayload),
    Metadata {
        name: String,
        environment: String,
        payload: MetadataTenantPayload,
    },
}

/// In-memory client for tests
#[derive(Clone, Default)]
pub struct MockEdpClient {
    pub calls: Arc<Mutex<Vec<EdpCall>>>,
    /// Error returned by every call while set
    failure: Arc<Mutex<Option<ExternalError>>>,
}

impl MockEdpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, error: Option<ExternalError>) {
        *self
            .failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = error;
    }

    pub fn recorded(&self) -> Vec<EdpCall> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.recorded().len()
    }

    fn record(&self, call: EdpCall) -> Result<(), ExternalError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(call);
        match self
            .failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
        {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EdpClient for MockEdpClient {
    async fn create_data_tenant(&self, payload: DataTenantPayload) -> Result<(), ExternalError> {
        self.record(EdpCall::DataTenant(payload))
    }

    async fn create_metadata_tenant(
        &self,
        name: &str,
        environment: &str,
        payload: MetadataTenantPayload,
    ) -> Result<(), ExternalError> {
        self.record(EdpCall::Metadata {
            name: name.to_string(),
            environment: environment.to_string(),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> HttpEdpClient {
        let config = EdpConfig {
            admin_url: server.url("/edp/"),
            namespace: "kyma-dev".to_string(),
            token: Some("t0k3n".to_string()),
            ..EdpConfig::default()
        };
        HttpEdpClient::new(&config)
            .unwrap()
            .with_retry(RetryConfig::none())
    }

    #[tokio::test]
    async fn test_create_data_tenant() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/edp/namespaces/kyma-dev/dataTenants")
                    .header("Authorization", "Bearer t0k3n")
                    .json_body(json!({
                        "name": "sub-1",
                        "environment": "dev",
                        "secret": "c3ViLTFkZXY="
                    }));
                then.status(201);
            })
            .await;

        client_for(&server)
            .create_data_tenant(DataTenantPayload {
                name: "sub-1".to_string(),
                environment: "dev".to_string(),
                secret: "c3ViLTFkZXY=".to_string(),
            })
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_metadata_conflict_is_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/edp/namespaces/kyma-dev/dataTenants/sub-1/dev/metadata")
                    .json_body(json!({"key": "maasConsumerRegion", "value": "cf-eu10"}));
                then.status(409).body("already exists");
            })
            .await;

        client_for(&server)
            .create_metadata_tenant(
                "sub-1",
                "dev",
                MetadataTenantPayload {
                    key: "maasConsumerRegion".to_string(),
                    value: "cf-eu10".to_string(),
                },
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_classification() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/edp/namespaces/kyma-dev/dataTenants");
                then.status(429);
            })
            .await;

        let err = client_for(&server)
            .create_data_tenant(DataTenantPayload {
                name: "sub-1".to_string(),
                environment: "dev".to_string(),
                secret: String::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_temporary());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_temporary() {
        let config = EdpConfig {
            admin_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            ..EdpConfig::default()
        };
        let client = HttpEdpClient::new(&config)
            .unwrap()
            .with_retry(RetryConfig::none());

        let err = client
            .create_data_tenant(DataTenantPayload {
                name: "sub-1".to_string(),
                environment: "dev".to_string(),
                secret: String::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_temporary());
    }

    #[tokio::test]
    async fn test_bad_request_is_permanent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/edp/namespaces/kyma-dev/dataTenants");
                then.status(400).body("missing secret");
            })
            .await;

        let err = client_for(&server)
            .create_data_tenant(DataTenantPayload {
                name: "sub-1".to_string(),
                environment: "dev".to_string(),
                secret: String::new(),
            })
            .await
            .unwrap_err();
        assert!(!err.is_temporary());
        assert_eq!(err.to_string(), "edp: HTTP 400 - missing secret");
    }
}
