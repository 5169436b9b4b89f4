use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::McpClientConfig;
use crate::error::{parse_error_message, McpError};
use crate::payload::InvokeRequest;
use crate::url::{endpoint_url, validate_base_url};

/// Identity reported by the info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Thin HTTP layer over the tool-server endpoints. Holds no session state.
#[derive(Debug, Clone)]
pub struct McpHttpClient {
    http: Client,
    config: McpClientConfig,
}

impl McpHttpClient {
    pub fn new(config: McpClientConfig) -> Result<Self, McpError> {
        validate_base_url(&config.base_url)?;
        let http = Client::builder().build().map_err(McpError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &McpClientConfig {
        &self.config
    }

    pub fn url(&self, path: &str) -> String {
        endpoint_url(&self.config.base_url, path)
    }

    pub fn event_stream_url(&self) -> String {
        self.url(&self.config.paths.sse)
    }

    fn with_request_timeout(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.timeout(self.config.request_timeout)
    }

    /// Opens the long-lived event stream. Never subject to the request timeout.
    pub async fn open_event_stream(&self) -> Result<Response, McpError> {
        let url = self.event_stream_url();
        debug!(%url, "opening event stream");
        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|error| McpError::Connection(format!("{url}: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Connection(format!(
                "{url}: HTTP {status} {}",
                parse_error_message(status, &body)
            )));
        }
        Ok(response)
    }

    /// Opens the stream endpoint without an event-stream `Accept` header.
    ///
    /// Used by the handshake fallback, which scans the raw body for a clientId.
    pub async fn fetch_handshake_body(&self) -> Result<Response, McpError> {
        let url = self.event_stream_url();
        debug!(%url, "opening raw handshake body");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|error| McpError::Connection(format!("{url}: {error}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Connection(format!("{url}: HTTP {status}")));
        }
        Ok(response)
    }

    /// GETs a JSON document from `path`.
    pub async fn get_json(&self, path: &str) -> Result<Value, McpError> {
        let url = self.url(path);
        let response = self
            .with_request_timeout(self.http.get(&url).header(ACCEPT, "application/json"))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(McpError::Status {
                status,
                message: parse_error_message(status, &body),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// POSTs one invocation. Status handling is left to the caller.
    pub async fn post_invoke(
        &self,
        request: &InvokeRequest,
    ) -> Result<(StatusCode, String), McpError> {
        let url = self.url(&self.config.paths.invoke);
        debug!(%url, message_id = %request.id, tool = %request.tool, "posting invocation");
        let response = self
            .with_request_timeout(self.http.post(&url).json(request))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    pub async fn server_info(&self) -> Result<ServerInfo, McpError> {
        let value = self.get_json(&self.config.paths.info).await?;
        Ok(serde_json::from_value(value)?)
    }
}
