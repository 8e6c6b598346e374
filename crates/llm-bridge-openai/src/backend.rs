//! The chat backend and shared HTTP plumbing.

use std::future::Future;
use std::pin::Pin;

use llm_bridge::{BackendInfo, ChatBackend, ChatRequest, ChatTurn, LlmError};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{OpenAiConfig, DEFAULT_GENERATION_MODEL};
use crate::convert;

/// Shared request plumbing for the chat, embeddings, and audio paths.
pub(crate) struct ApiClient {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl ApiClient {
    pub(crate) fn new(config: OpenAiConfig) -> Self {
        let client = config.client.clone().unwrap_or_else(|| {
            let mut builder = reqwest::Client::builder();
            if let Some(timeout) = config.timeout {
                builder = builder.timeout(timeout);
            }
            builder.build().expect("failed to build HTTP client")
        });
        Self { config, client }
    }

    pub(crate) fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}{path}")
    }

    fn auth_headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", self.config.api_key);
        headers.insert(
            "authorization",
            HeaderValue::from_str(&bearer).map_err(|_| LlmError::ProviderCallFailed {
                status: None,
                message: "API key contains invalid header characters".into(),
            })?,
        );
        Ok(headers)
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError> {
        let send = request.send();
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = send => result.map_err(|e| LlmError::ProviderCallFailed {
                status: e.status().map(|s| {
                    http::StatusCode::from_u16(s.as_u16())
                        .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
                }),
                message: e.to_string(),
            })?,
        };

        let status = http::StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = tokio::select! {
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = response.text() => result.map_err(|e| LlmError::ProviderCallFailed {
                status: Some(status),
                message: format!("reading response body: {e}"),
            })?,
        };

        if !status.is_success() {
            return Err(convert::convert_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| LlmError::ProviderCallFailed {
            status: Some(status),
            message: format!("parsing response body: {e}"),
        })
    }

    /// POSTs a JSON body and returns the parsed JSON response.
    pub(crate) async fn post_json(
        &self,
        path: &str,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError> {
        let request = self
            .client
            .post(self.url(path))
            .headers(self.auth_headers()?)
            .json(body);
        self.execute(request, cancel).await
    }

    /// POSTs a multipart form and returns the parsed JSON response.
    pub(crate) async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError> {
        let request = self
            .client
            .post(self.url(path))
            .headers(self.auth_headers()?)
            .multipart(form);
        self.execute(request, cancel).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// [`ChatBackend`] over the Responses API.
#[derive(Debug)]
pub struct OpenAiBackend {
    api: ApiClient,
}

impl OpenAiBackend {
    /// Builds a backend from adapter configuration.
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            api: ApiClient::new(config),
        }
    }

    #[instrument(skip_all)]
    async fn submit_inner(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatTurn, LlmError> {
        let model = request
            .model
            .as_deref()
            .or(self.api.config().model.as_deref())
            .unwrap_or(DEFAULT_GENERATION_MODEL);
        let body = convert::build_request(request, model);
        let response = self.api.post_json("/responses", &body, cancel).await?;
        let parsed = serde_json::from_value(response).map_err(|e| {
            LlmError::ProviderCallFailed {
                status: None,
                message: format!("unexpected responses payload: {e}"),
            }
        })?;
        Ok(convert::convert_response(parsed))
    }
}

impl ChatBackend for OpenAiBackend {
    fn submit<'a>(
        &'a self,
        request: &'a ChatRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ChatTurn, LlmError>> + Send + 'a>> {
        Box::pin(self.submit_inner(request, cancel))
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            provider: "openai".into(),
            default_model: self
                .api
                .config()
                .model
                .clone()
                .map_or(DEFAULT_GENERATION_MODEL.into(), Into::into),
            schema_constrained_output: true,
        }
    }
}
