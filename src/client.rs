use chrono::NaiveDate;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::ApiError;
use crate::models::{HttpMethod, OutgoingRequest};

/// Read side of the remote wellbeing API. Responses are returned raw and
/// normalized by the caller.
#[trait_variant::make(RemoteApi: Send)]
#[allow(dead_code)]
pub trait LocalRemoteApi {
    async fn mood_entries(&self, user_id: &str, date: NaiveDate) -> Result<Value, ApiError>;

    async fn appointments(&self, user_id: &str) -> Result<Value, ApiError>;

    async fn goals(&self, user_id: &str) -> Result<Value, ApiError>;
}

/// Executes app-issued requests against the remote API.
#[trait_variant::make(RequestTransport: Send)]
#[allow(dead_code)]
pub trait LocalRequestTransport {
    async fn send(&self, request: &OutgoingRequest) -> Result<Value, ApiError>;
}

#[derive(Clone)]
pub struct ApiClient {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            http_client: HttpClient::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    async fn execute(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = self.url(endpoint);
        debug!(method = method.as_str(), url = %url, "Calling remote API");

        let mut request = self.http_client.request(method.into(), &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl RemoteApi for ApiClient {
    async fn mood_entries(&self, user_id: &str, date: NaiveDate) -> Result<Value, ApiError> {
        let endpoint = format!("/feelings/user/{}?date={}", user_id, date.format("%Y-%m-%d"));
        self.execute(HttpMethod::Get, &endpoint, None).await
    }

    async fn appointments(&self, user_id: &str) -> Result<Value, ApiError> {
        let endpoint = format!("/appointments/user/{}", user_id);
        self.execute(HttpMethod::Get, &endpoint, None).await
    }

    async fn goals(&self, user_id: &str) -> Result<Value, ApiError> {
        let endpoint = format!("/goals/user/{}", user_id);
        self.execute(HttpMethod::Get, &endpoint, None).await
    }
}

impl RequestTransport for ApiClient {
    async fn send(&self, request: &OutgoingRequest) -> Result<Value, ApiError> {
        self.execute(request.method, &request.endpoint, request.body.as_ref())
            .await
    }
}
