use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Default wait for the `connected` event after the stream opens.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default lifetime of a clientId before it must be reacquired.
pub const DEFAULT_CLIENT_ID_TTL: Duration = Duration::from_secs(30 * 60);
/// Default bound on one invocation, from the POST until the terminal result.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default bound on `/tools`, `/invoke` and `/info` requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on bytes scanned by the handshake fallback.
pub const DEFAULT_FALLBACK_BODY_LIMIT: usize = 64 * 1024;

/// Tool-server endpoint paths, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPaths {
    pub sse: String,
    pub tools: String,
    pub invoke: String,
    pub info: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            sse: "/sse".to_string(),
            tools: "/tools".to_string(),
            invoke: "/invoke".to_string(),
            info: "/info".to_string(),
        }
    }
}

/// Transport configuration for one tool server.
#[derive(Debug, Clone)]
pub struct McpClientConfig {
    /// Base URL of the tool server, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    pub paths: EndpointPaths,
    pub handshake_timeout: Duration,
    pub client_id_ttl: Duration,
    /// Covers the invoke POST and the wait for its result.
    pub invoke_timeout: Duration,
    /// Timeout for non-streaming requests. The event stream is never timed out.
    pub request_timeout: Duration,
    pub reconnect: BackoffPolicy,
    pub fallback_body_limit: usize,
}

impl Default for McpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            paths: EndpointPaths::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            client_id_ttl: DEFAULT_CLIENT_ID_TTL,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: BackoffPolicy::default(),
            fallback_body_limit: DEFAULT_FALLBACK_BODY_LIMIT,
        }
    }
}

impl McpClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_paths(mut self, paths: EndpointPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_client_id_ttl(mut self, ttl: Duration) -> Self {
        self.client_id_ttl = ttl;
        self
    }

    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: BackoffPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_fallback_body_limit(mut self, limit: usize) -> Self {
        self.fallback_body_limit = limit;
        self
    }
}
