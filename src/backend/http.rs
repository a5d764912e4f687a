use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{BackendClient, CreatePollRequest, DeletePollResponse, QueuedPollPage};
use crate::config::BackendConfig;
use crate::queued::ValidationReport;

/// Per-request timeout for REST calls
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Backend client over HTTP with bearer authentication
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct AuthResponse {
    auth: String,
}

#[derive(Deserialize)]
struct CreatePollResponse {
    id: i64,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self::with_client(client, base_url, token)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(&config.api_base_url, &config.api_token)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    /// Send and decode, collapsing every failure into `None`
    async fn fetch<T: DeserializeOwned>(&self, operation: &str, request: RequestBuilder) -> Option<T> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(operation, error = %e, "Backend request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(operation, status = status.as_u16(), "Backend rejected request");
            return None;
        }

        match response.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(operation, error = %e, "Backend response did not decode");
                None
            }
        }
    }

    /// Send and report only whether the backend accepted the call
    async fn confirm(&self, operation: &str, request: RequestBuilder) -> bool {
        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(operation, status = response.status().as_u16(), "Backend rejected request");
                false
            }
            Err(e) => {
                warn!(operation, error = %e, "Backend request failed");
                false
            }
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    #[instrument(skip(self), level = "debug")]
    async fn authorize_channel(&self, socket_id: &str, channel: &str) -> Option<String> {
        let request = self
            .request(Method::POST, "/broadcasting/auth")
            .json(&json!({ "socket_id": socket_id, "channel_name": channel }));

        let response: AuthResponse = self.fetch("authorize_channel", request).await?;
        debug!("Channel authorization received");
        Some(response.auth)
    }

    #[instrument(skip(self, request), fields(title = %request.title), level = "debug")]
    async fn create_poll(&self, request: &CreatePollRequest) -> Option<i64> {
        let builder = self.request(Method::POST, "/broadcasting/polls/create").json(request);
        let response: CreatePollResponse = self.fetch("create_poll", builder).await?;
        Some(response.id)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_poll(&self) -> Option<DeletePollResponse> {
        let request = self.request(Method::DELETE, "/broadcasting/polls/delete");
        self.fetch("delete_poll", request).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_queued_polls(&self, page: u32) -> Option<QueuedPollPage> {
        let request = self
            .request(Method::GET, "/broadcasting/queued-polls")
            .query(&[("page", page)]);
        self.fetch("list_queued_polls", request).await
    }

    #[instrument(skip(self, report), fields(valid = report.is_valid), level = "debug")]
    async fn report_validation(&self, queued_id: i64, report: &ValidationReport) -> bool {
        let request = self
            .request(
                Method::POST,
                &format!("/broadcasting/queued-polls/{}/validate", queued_id),
            )
            .json(report);
        self.confirm("report_validation", request).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_queued_poll(&self, queued_id: i64) -> bool {
        let request = self.request(
            Method::DELETE,
            &format!("/broadcasting/queued-polls/{}", queued_id),
        );
        self.confirm("delete_queued_poll", request).await
    }
}
