use std::sync::Arc;

use agent_contract::{CommandResult, ToolDescriptor};
use async_trait::async_trait;
use mcp_client::{
    ConnectionManager, ConnectionStatus, Executor, McpClientConfig, McpError, ServerInfo,
    ToolRegistry,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::approval::ApprovedCommand;

/// Receives streamed progress for the command being executed.
pub type ProgressSink = Box<dyn FnMut(&Value) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The clientId is gone or the event stream dropped. Recoverable by
    /// reconnecting once.
    #[error("tool session lost: {0}")]
    Lost(String),

    #[error("tool server unavailable: {0}")]
    Unavailable(String),

    #[error("tool discovery failed: {0}")]
    ToolDiscovery(String),
}

impl SessionError {
    pub fn is_session_loss(&self) -> bool {
        matches!(self, Self::Lost(_))
    }
}

impl From<McpError> for SessionError {
    fn from(error: McpError) -> Self {
        match error {
            McpError::ToolDiscovery(reason) => Self::ToolDiscovery(reason),
            error if error.is_session_loss() => Self::Lost(error.to_string()),
            error @ McpError::ClientIdTimeout { .. } => Self::Lost(error.to_string()),
            error => Self::Unavailable(error.to_string()),
        }
    }
}

/// Tool-server seam used by the runtime.
#[async_trait]
pub trait ToolSession: Send + Sync + 'static {
    async fn connect(&self) -> Result<String, SessionError>;

    async fn reconnect(&self) -> Result<String, SessionError>;

    /// Fetches the catalog for the live session.
    ///
    /// On failure the caller keeps whatever catalog it already holds.
    async fn discover_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError>;

    async fn execute(
        &self,
        command: &ApprovedCommand,
        progress: ProgressSink,
    ) -> Result<CommandResult, SessionError>;

    fn status(&self) -> ConnectionStatus;

    fn disconnect(&self);
}

/// [`ToolSession`] over the HTTP + event-stream tool server client.
pub struct McpToolSession {
    connection: Arc<ConnectionManager>,
    executor: Executor,
    registry: Mutex<ToolRegistry>,
}

impl McpToolSession {
    pub fn new(config: McpClientConfig) -> Result<Self, SessionError> {
        let connection = Arc::new(ConnectionManager::new(config).map_err(SessionError::from)?);
        Ok(Self {
            executor: Executor::new(Arc::clone(&connection)),
            connection,
            registry: Mutex::new(ToolRegistry::new()),
        })
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub async fn server_info(&self) -> Result<ServerInfo, SessionError> {
        self.connection
            .http()
            .server_info()
            .await
            .map_err(SessionError::from)
    }
}

#[async_trait]
impl ToolSession for McpToolSession {
    async fn connect(&self) -> Result<String, SessionError> {
        let client_id = self.connection.connect().await?;
        info!(%client_id, "tool session established");
        Ok(client_id)
    }

    async fn reconnect(&self) -> Result<String, SessionError> {
        // Exhausted reconnects are final; the caller must not retry again.
        self.connection
            .reconnect()
            .await
            .map_err(|error| SessionError::Unavailable(error.to_string()))
    }

    async fn discover_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        let mut registry = self.registry.lock().await;
        registry
            .discover_tools(&self.connection)
            .await
            .map_err(SessionError::from)
    }

    async fn execute(
        &self,
        command: &ApprovedCommand,
        progress: ProgressSink,
    ) -> Result<CommandResult, SessionError> {
        self.executor
            .execute_with_progress(command.command(), progress)
            .await
            .map_err(SessionError::from)
    }

    fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    fn disconnect(&self) {
        self.connection.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mcp_client::McpError;

    use super::SessionError;

    #[test]
    fn session_loss_errors_are_recoverable() {
        assert!(SessionError::from(McpError::InvalidSession).is_session_loss());
        assert!(SessionError::from(McpError::Connection("reset".to_string())).is_session_loss());
        assert!(SessionError::from(McpError::ClientIdTimeout {
            timeout: Duration::from_secs(1)
        })
        .is_session_loss());
    }

    #[test]
    fn other_errors_are_final() {
        let error = SessionError::from(McpError::ReconnectExhausted {
            attempts: 5,
            last_error: "refused".to_string(),
        });
        assert!(!error.is_session_loss());
        assert_eq!(
            error.to_string(),
            "tool server unavailable: reconnect gave up after 5 attempts: refused"
        );
    }

    #[test]
    fn discovery_errors_keep_their_reason() {
        let error = SessionError::from(McpError::ToolDiscovery("timed out".to_string()));
        assert_eq!(error, SessionError::ToolDiscovery("timed out".to_string()));
        assert!(!error.is_session_loss());
        assert_eq!(error.to_string(), "tool discovery failed: timed out");
    }
}
