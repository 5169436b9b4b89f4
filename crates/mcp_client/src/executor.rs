use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_contract::{Command, CommandResult};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::error::{parse_error_message, McpError};
use crate::events::ServerEvent;
use crate::payload::{
    extract_tool_content, new_message_id, parse_invoke_reply, tool_error_message, InvokeReply,
    InvokeRequest, ToolOutput,
};

/// Runs commands against the tool server one at a time.
///
/// Invocations are serialized through a FIFO lane: at most one is in flight,
/// and callers are served in arrival order.
pub struct Executor {
    connection: Arc<ConnectionManager>,
    lane: tokio::sync::Mutex<()>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    invocations: AtomicUsize,
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Removes the router registration however the invocation ends.
struct Registration<'a> {
    connection: &'a ConnectionManager,
    id: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.connection.router().unregister(&self.id);
    }
}

impl Executor {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            lane: tokio::sync::Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Highest number of simultaneous invocations observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Invocations that reached the network.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub async fn execute(&self, command: &Command) -> Result<CommandResult, McpError> {
        self.execute_with_progress(command, |_| {}).await
    }

    /// Invokes `command` and waits for its result.
    ///
    /// Session loss surfaces as `InvalidSession` or `Connection` and is the
    /// caller's to recover. Tool-level failures, non-auth HTTP errors and
    /// timeouts come back as a failed [`CommandResult`].
    pub async fn execute_with_progress<F>(
        &self,
        command: &Command,
        mut on_progress: F,
    ) -> Result<CommandResult, McpError>
    where
        F: FnMut(&Value) + Send,
    {
        let _lane = self.lane.lock().await;
        let client_id = self.connection.verify_client_id()?;
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        let message_id = new_message_id();
        let mut registration = Registration {
            connection: &self.connection,
            id: message_id.clone(),
        };
        // Registered before the POST so a fast result is not missed.
        let events = self.connection.router().register(&message_id);

        let request = InvokeRequest::new(
            message_id,
            client_id,
            command.tool_name.clone(),
            command.parameters.clone(),
        );
        self.invocations.fetch_add(1, Ordering::SeqCst);
        info!(
            command_id = %command.id,
            tool = %command.tool_name,
            message_id = %request.id,
            "invoking tool"
        );

        let timeout = self.connection.http().config().invoke_timeout;
        let invocation = self.invoke(
            command,
            request,
            &mut registration,
            events,
            &mut on_progress,
        );
        match tokio::time::timeout(timeout, invocation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(command_id = %command.id, ?timeout, "tool result timed out");
                Ok(timed_out(&command.id, timeout))
            }
        }
    }

    async fn invoke<F>(
        &self,
        command: &Command,
        request: InvokeRequest,
        registration: &mut Registration<'_>,
        mut events: mpsc::UnboundedReceiver<ServerEvent>,
        on_progress: &mut F,
    ) -> Result<CommandResult, McpError>
    where
        F: FnMut(&Value) + Send,
    {
        let message_id = request.id.clone();
        let (status, body) = match self.connection.http().post_invoke(&request).await {
            Ok(reply) => reply,
            Err(McpError::Request(error)) if error.is_timeout() => {
                let timeout = self.connection.http().config().request_timeout;
                warn!(command_id = %command.id, ?timeout, "invoke request timed out");
                return Ok(timed_out(&command.id, timeout));
            }
            Err(McpError::Request(error)) => return Err(McpError::Connection(error.to_string())),
            Err(other) => return Err(other),
        };

        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::GONE
        ) {
            warn!(%status, command_id = %command.id, "server rejected the clientId");
            return Err(McpError::InvalidSession);
        }
        if !status.is_success() {
            let message = format!("HTTP {status}: {}", parse_error_message(status, &body));
            warn!(command_id = %command.id, %message, "invocation failed");
            return Ok(CommandResult::failure(&command.id, message, Value::Null));
        }

        let correlation_id = match parse_invoke_reply(&message_id, &body) {
            InvokeReply::Immediate(output) => return Ok(output.into_result(&command.id)),
            InvokeReply::Deferred { correlation_id } => correlation_id,
        };

        if correlation_id != message_id {
            debug!(%message_id, %correlation_id, "server assigned a correlation id");
            events = self.connection.router().register(&correlation_id);
            self.connection.router().unregister(&message_id);
            registration.id = correlation_id;
        }

        match await_terminal(&mut events, on_progress).await {
            Some(output) => Ok(output.into_result(&command.id)),
            None => Err(McpError::Connection(
                "event stream closed while awaiting the tool result".to_string(),
            )),
        }
    }
}

fn timed_out(command_id: &str, timeout: Duration) -> CommandResult {
    CommandResult::failure(
        command_id,
        format!(
            "Timeout waiting for tool result after {}s",
            timeout.as_secs_f64()
        ),
        Value::Null,
    )
}

/// Consumes correlated events until a terminal one. `None` means the stream closed.
async fn await_terminal<F>(
    events: &mut mpsc::UnboundedReceiver<ServerEvent>,
    on_progress: &mut F,
) -> Option<ToolOutput>
where
    F: FnMut(&Value),
{
    let mut last_partial = None;
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::ToolProgress { content, .. } => on_progress(&content),
            ServerEvent::ToolResult {
                content,
                partial: true,
                ..
            } => {
                let payload = extract_tool_content(&content);
                on_progress(&payload);
                last_partial = Some(payload);
            }
            ServerEvent::ToolResult {
                content, is_error, ..
            } => {
                let payload = extract_tool_content(&content);
                return Some(if is_error {
                    ToolOutput::failed(tool_error_message(&payload), payload)
                } else {
                    ToolOutput::ok(payload)
                });
            }
            ServerEvent::ToolError { message, .. } => {
                return Some(ToolOutput::failed(message, Value::Null));
            }
            ServerEvent::ToolComplete { .. } => {
                return Some(ToolOutput::ok(last_partial.unwrap_or(Value::Null)));
            }
            ServerEvent::Connected { .. } | ServerEvent::Ping | ServerEvent::Unknown { .. } => {}
        }
    }
    None
}
