//! Client for the sidecar's loopback-only management endpoint and for
//! data-plane forwarding.
//!
//! The trait seam exists so route and supervisor tests can run against
//! [`MockSidecarManagement`] without a live sidecar.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};

use super::SidecarError;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Health snapshot reported by the sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarHealth {
    pub running: bool,
    pub uptime_seconds: Option<u64>,
    pub version: Option<String>,
}

/// Per-provider status reported by the sidecar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarProviderStatus {
    pub name: String,
    pub status: String,
    pub accounts_count: i64,
    pub last_error: Option<String>,
}

/// A forwarded response: status, headers, and a body stream.
///
/// The body is streamed through, never buffered whole, so large and
/// server-sent-event responses pass straight to the client.
pub struct SidecarResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, SidecarError>>,
}

#[async_trait]
pub trait SidecarManagement: Send + Sync {
    /// Probe the sidecar's health endpoint.
    async fn health(&self) -> Result<SidecarHealth, SidecarError>;

    /// Fetch one provider's status from the management surface.
    async fn provider_status(&self, provider: &str) -> Result<SidecarProviderStatus, SidecarError>;

    /// Forward a data-plane request and stream the response back.
    async fn forward(
        &self,
        path: &str,
        method: Method,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<SidecarResponse, SidecarError>;
}

/// HTTP implementation talking to the loopback management URL
pub struct HttpSidecarManagement {
    base_url: String,
    client: reqwest::Client,
    forward_timeout: Duration,
}

impl HttpSidecarManagement {
    pub fn new(base_url: String, forward_timeout: Duration) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
            forward_timeout,
        }
    }
}

#[async_trait]
impl SidecarManagement for HttpSidecarManagement {
    async fn health(&self) -> Result<SidecarHealth, SidecarError> {
        let url = format!("{}/v0/management/health", self.base_url);
        let health = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<SidecarHealth>()
            .await?;
        Ok(health)
    }

    async fn provider_status(&self, provider: &str) -> Result<SidecarProviderStatus, SidecarError> {
        let url = format!("{}/v0/management/providers/{}", self.base_url, provider);
        let status = self
            .client
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<SidecarProviderStatus>()
            .await?;
        Ok(status)
    }

    async fn forward(
        &self,
        path: &str,
        method: Method,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<SidecarResponse, SidecarError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .client
            .request(method, &url)
            .timeout(self.forward_timeout);
        for (name, value) in headers.iter() {
            request = request.header(name.clone(), value.clone());
        }

        let response = request.body(body).send().await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SidecarError::from))
            .boxed();

        Ok(SidecarResponse {
            status,
            headers,
            body,
        })
    }
}

/// In-memory mock used by tests
#[derive(Default)]
pub struct MockSidecarManagement {
    pub health_response: std::sync::Mutex<Option<SidecarHealth>>,
    pub provider_statuses: std::sync::Mutex<Vec<SidecarProviderStatus>>,
    pub forward_response: std::sync::Mutex<Option<(u16, HeaderMap, Bytes)>>,
    pub call_log: std::sync::Mutex<Vec<String>>,
}

impl MockSidecarManagement {
    fn log_call(&self, call: String) {
        self.call_log.lock().unwrap().push(call);
    }

    /// Configure the mock as a healthy sidecar.
    pub fn set_healthy(&self) {
        *self.health_response.lock().unwrap() = Some(SidecarHealth {
            running: true,
            uptime_seconds: Some(120),
            version: Some("1.0.0".to_string()),
        });
    }

    /// Configure the next forwarded response.
    pub fn set_forward_json(&self, status: u16, body: &serde_json::Value) {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        *self.forward_response.lock().unwrap() = Some((
            status,
            headers,
            Bytes::from(serde_json::to_vec(body).unwrap()),
        ));
    }

    /// Configure the next forwarded response as an SSE stream.
    pub fn set_forward_sse(&self, chunks: &str) {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/event-stream".parse().unwrap());
        *self.forward_response.lock().unwrap() =
            Some((200, headers, Bytes::from(chunks.to_string())));
    }
}

#[async_trait]
impl SidecarManagement for MockSidecarManagement {
    async fn health(&self) -> Result<SidecarHealth, SidecarError> {
        self.log_call("health".to_string());
        self.health_response
            .lock()
            .unwrap()
            .clone()
            .ok_or(SidecarError::NotRunning)
    }

    async fn provider_status(&self, provider: &str) -> Result<SidecarProviderStatus, SidecarError> {
        self.log_call(format!("provider_status:{}", provider));
        self.provider_statuses
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name == provider)
            .cloned()
            .ok_or(SidecarError::NotRunning)
    }

    async fn forward(
        &self,
        path: &str,
        method: Method,
        _headers: HeaderMap,
        _body: Bytes,
    ) -> Result<SidecarResponse, SidecarError> {
        self.log_call(format!("forward:{}:{}", method, path));
        let (status, headers, body) = self
            .forward_response
            .lock()
            .unwrap()
            .clone()
            .ok_or(SidecarError::NotRunning)?;

        Ok(SidecarResponse {
            status,
            headers,
            body: futures::stream::iter(vec![Ok(body)]).boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let mock = MockSidecarManagement::default();
        mock.set_healthy();
        mock.set_forward_json(200, &serde_json::json!({"ok": true}));

        let health = mock.health().await.unwrap();
        assert!(health.running);

        let response = mock
            .forward("/v1/models", Method::GET, HeaderMap::new(), Bytes::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let calls = mock.call_log.lock().unwrap().clone();
        assert_eq!(calls, vec!["health", "forward:GET:/v1/models"]);
    }

    #[tokio::test]
    async fn test_mock_without_config_is_not_running() {
        let mock = MockSidecarManagement::default();
        assert!(matches!(
            mock.health().await,
            Err(SidecarError::NotRunning)
        ));
        assert!(matches!(
            mock.provider_status("claude").await,
            Err(SidecarError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_mock_provider_status_lookup() {
        let mock = MockSidecarManagement::default();
        *mock.provider_statuses.lock().unwrap() = vec![SidecarProviderStatus {
            name: "claude".to_string(),
            status: "healthy".to_string(),
            accounts_count: 2,
            last_error: None,
        }];

        let status = mock.provider_status("claude").await.unwrap();
        assert_eq!(status.accounts_count, 2);
        assert!(mock.provider_status("gemini").await.is_err());
    }
}
