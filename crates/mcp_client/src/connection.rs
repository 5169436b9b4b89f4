use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::McpHttpClient;
use crate::config::McpClientConfig;
use crate::error::McpError;
use crate::events::ServerEvent;
use crate::handshake::extract_client_id;
use crate::retry::Backoff;
use crate::router::EventRouter;
use crate::sse::SseStreamParser;

/// Consecutive primary handshake failures before the raw-body fallback runs.
const PRIMARY_FAILURES_BEFORE_FALLBACK: u32 = 2;

/// Externally visible session status.
///
/// `Connected` is reported only while an unexpired clientId is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// The session was lost or the clientId expired; reconnection is needed.
    Degraded,
    /// Reconnection gave up.
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

// There is no connected phase: that status is derived from the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Disconnected,
    Connecting,
    Degraded,
    Failed,
}

#[derive(Debug, Clone)]
struct SessionToken {
    client_id: String,
    acquired_at: Instant,
    generation: u64,
}

struct LinkState {
    phase: LinkPhase,
    session: Option<SessionToken>,
    reconnect_attempt: u32,
    /// Latest reserved stream generation. Listeners of older generations are stale.
    generation: u64,
    listener: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<LinkState>,
    router: EventRouter,
    client_id_ttl: Duration,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        lock_unpoisoned(&self.state)
    }

    fn is_valid(&self, token: &SessionToken) -> bool {
        token.acquired_at.elapsed() < self.client_id_ttl
    }

    fn status_locked(&self, state: &LinkState) -> ConnectionStatus {
        match &state.session {
            Some(token) if self.is_valid(token) => ConnectionStatus::Connected,
            Some(_) => ConnectionStatus::Degraded,
            None => match state.phase {
                LinkPhase::Disconnected => ConnectionStatus::Disconnected,
                LinkPhase::Connecting => ConnectionStatus::Connecting,
                LinkPhase::Degraded => ConnectionStatus::Degraded,
                LinkPhase::Failed => ConnectionStatus::Failed,
            },
        }
    }

    /// Stores a clientId delivered by the stream of `generation`.
    fn install_session(&self, client_id: &str, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        let refreshed = state
            .session
            .as_ref()
            .is_some_and(|token| token.client_id != client_id);
        if refreshed {
            info!(client_id, "server issued a new clientId");
        }
        state.session = Some(SessionToken {
            client_id: client_id.to_string(),
            acquired_at: Instant::now(),
            generation,
        });
        state.reconnect_attempt = 0;
        true
    }

    fn stream_lost(&self, generation: u64, reason: &str) {
        {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            if state
                .session
                .as_ref()
                .is_some_and(|token| token.generation == generation)
            {
                state.session = None;
            }
            state.phase = LinkPhase::Degraded;
            state.listener = None;
        }
        warn!(generation, reason, "event stream lost");
        self.router.close_all();
    }
}

/// Point-in-time view of the connection, read under a single lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub endpoint_url: String,
    pub client_id: Option<String>,
    pub status: ConnectionStatus,
    pub reconnect_attempt: u32,
    pub generation: Option<u64>,
}

/// Owns the event stream and the session clientId for one tool server.
pub struct ConnectionManager {
    http: McpHttpClient,
    shared: Arc<Shared>,
    /// Held for the whole of a connect or reconnect cycle.
    backoff: tokio::sync::Mutex<Backoff>,
}

impl ConnectionManager {
    pub fn new(config: McpClientConfig) -> Result<Self, McpError> {
        let client_id_ttl = config.client_id_ttl;
        let backoff = Backoff::new(config.reconnect.clone());
        let http = McpHttpClient::new(config)?;
        Ok(Self {
            http,
            shared: Arc::new(Shared {
                state: Mutex::new(LinkState {
                    phase: LinkPhase::Disconnected,
                    session: None,
                    reconnect_attempt: 0,
                    generation: 0,
                    listener: None,
                }),
                router: EventRouter::default(),
                client_id_ttl,
            }),
            backoff: tokio::sync::Mutex::new(backoff),
        })
    }

    pub fn http(&self) -> &McpHttpClient {
        &self.http
    }

    pub(crate) fn router(&self) -> &EventRouter {
        &self.shared.router
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = self.shared.lock();
        self.shared.status_locked(&state)
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let state = self.shared.lock();
        let valid = state
            .session
            .as_ref()
            .filter(|token| self.shared.is_valid(token));
        ConnectionSnapshot {
            endpoint_url: self.http.event_stream_url(),
            client_id: valid.map(|token| token.client_id.clone()),
            status: self.shared.status_locked(&state),
            reconnect_attempt: state.reconnect_attempt,
            generation: valid.map(|token| token.generation),
        }
    }

    /// The current clientId, only while it is unexpired.
    pub fn client_id(&self) -> Option<String> {
        let state = self.shared.lock();
        state
            .session
            .as_ref()
            .filter(|token| self.shared.is_valid(token))
            .map(|token| token.client_id.clone())
    }

    /// Like [`Self::client_id`], failing with [`McpError::InvalidSession`].
    pub fn verify_client_id(&self) -> Result<String, McpError> {
        self.client_id().ok_or(McpError::InvalidSession)
    }

    /// Generation of the live session. Changes whenever a new stream is established.
    pub fn generation(&self) -> Option<u64> {
        self.snapshot().generation
    }

    /// Establishes a session, or returns the existing clientId if still valid.
    pub async fn connect(&self) -> Result<String, McpError> {
        let _guard = self.backoff.lock().await;
        if let Some(client_id) = self.client_id() {
            return Ok(client_id);
        }

        self.set_phase(LinkPhase::Connecting);
        match self.primary_handshake().await {
            Ok(client_id) => {
                info!(%client_id, "connected to tool server");
                Ok(client_id)
            }
            Err(error) => {
                warn!(%error, "connect failed");
                self.set_phase(LinkPhase::Disconnected);
                Err(error)
            }
        }
    }

    /// Drops the current session and reacquires one with bounded backoff.
    ///
    /// After two primary handshake failures the raw-body fallback is tried
    /// once. When the attempt budget is spent the status becomes `Failed`.
    pub async fn reconnect(&self) -> Result<String, McpError> {
        let mut backoff = self.backoff.lock().await;
        backoff.reset();
        self.teardown(LinkPhase::Degraded);

        let mut primary_failures = 0;
        let mut fallback_tried = false;
        let mut last_error = String::from("no attempts made");

        while let Some(delay) = backoff.next_delay() {
            let attempt = backoff.attempt();
            self.shared.lock().reconnect_attempt = attempt;
            debug!(attempt, ?delay, "reconnect scheduled");
            tokio::time::sleep(delay).await;

            let use_fallback =
                primary_failures >= PRIMARY_FAILURES_BEFORE_FALLBACK && !fallback_tried;
            let outcome = if use_fallback {
                fallback_tried = true;
                self.fallback_handshake().await
            } else {
                self.primary_handshake().await
            };

            match outcome {
                Ok(client_id) => {
                    info!(%client_id, attempt, fallback = use_fallback, "reconnected");
                    self.shared.lock().reconnect_attempt = 0;
                    return Ok(client_id);
                }
                Err(error) => {
                    if !use_fallback {
                        primary_failures += 1;
                    }
                    warn!(%error, attempt, fallback = use_fallback, "reconnect attempt failed");
                    last_error = error.to_string();
                    self.set_phase(LinkPhase::Degraded);
                }
            }
        }

        let attempts = backoff.attempt();
        self.set_phase(LinkPhase::Failed);
        warn!(attempts, "reconnect exhausted");
        Err(McpError::ReconnectExhausted {
            attempts,
            last_error,
        })
    }

    /// Closes the stream and forgets the clientId. Safe to call repeatedly.
    pub fn disconnect(&self) {
        self.teardown(LinkPhase::Disconnected);
        self.shared.lock().reconnect_attempt = 0;
    }

    fn set_phase(&self, phase: LinkPhase) {
        self.shared.lock().phase = phase;
    }

    fn reserve_generation(&self) -> u64 {
        let mut state = self.shared.lock();
        state.generation += 1;
        state.generation
    }

    fn teardown(&self, phase: LinkPhase) {
        let listener = {
            let mut state = self.shared.lock();
            state.generation += 1;
            state.session = None;
            state.phase = phase;
            state.listener.take()
        };
        if let Some(listener) = listener {
            listener.abort();
        }
        self.shared.router.close_all();
    }

    /// Gives up on `generation` if it is still the latest one.
    fn abandon(&self, generation: u64) {
        let listener = {
            let mut state = self.shared.lock();
            if state.generation != generation {
                return;
            }
            state.generation += 1;
            if state
                .session
                .as_ref()
                .is_some_and(|token| token.generation == generation)
            {
                state.session = None;
            }
            state.listener.take()
        };
        if let Some(listener) = listener {
            listener.abort();
        }
    }

    fn store_listener(&self, generation: u64, handle: JoinHandle<()>) {
        let mut state = self.shared.lock();
        if state.generation == generation {
            if let Some(previous) = state.listener.replace(handle) {
                previous.abort();
            }
        } else {
            handle.abort();
        }
    }

    async fn primary_handshake(&self) -> Result<String, McpError> {
        let timeout = self.http.config().handshake_timeout;
        let generation = self.reserve_generation();
        if let Some(previous) = self.shared.lock().listener.take() {
            previous.abort();
        }

        let attempt = async {
            let response = self.http.open_event_stream().await?;
            let (tx, rx) = oneshot::channel();
            let handle = tokio::spawn(listen(
                Box::pin(response.bytes_stream()),
                Vec::new(),
                Some(tx),
                Arc::clone(&self.shared),
                generation,
            ));
            self.store_listener(generation, handle);
            rx.await.map_err(|_| {
                McpError::Connection("event stream closed before a clientId arrived".to_string())
            })
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(client_id)) => Ok(client_id),
            Ok(Err(error)) => {
                self.abandon(generation);
                Err(error)
            }
            Err(_) => {
                self.abandon(generation);
                Err(McpError::ClientIdTimeout { timeout })
            }
        }
    }

    /// Scans the raw stream body for a clientId, then keeps listening on it.
    async fn fallback_handshake(&self) -> Result<String, McpError> {
        let timeout = self.http.config().handshake_timeout;
        let limit = self.http.config().fallback_body_limit;
        let generation = self.reserve_generation();
        if let Some(previous) = self.shared.lock().listener.take() {
            previous.abort();
        }

        let attempt = async {
            let response = self.http.fetch_handshake_body().await?;
            let mut stream = Box::pin(response.bytes_stream());
            let mut raw: Vec<u8> = Vec::new();
            loop {
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        raw.extend_from_slice(chunk.as_ref());
                        let found = {
                            let text = String::from_utf8_lossy(&raw);
                            // Only complete lines, so an id split across chunks is not truncated.
                            let scanned = text.rfind('\n').map_or("", |end| &text[..end]);
                            extract_client_id(scanned)
                        };
                        if let Some(client_id) = found {
                            return Ok((client_id, stream, raw));
                        }
                        if raw.len() >= limit {
                            return Err(McpError::Connection(format!(
                                "no clientId in the first {limit} bytes of the handshake body"
                            )));
                        }
                    }
                    Some(Err(error)) => {
                        return Err(McpError::Connection(format!("handshake body: {error}")));
                    }
                    None => {
                        let found = extract_client_id(&String::from_utf8_lossy(&raw));
                        return match found {
                            Some(client_id) => Ok((client_id, stream, raw)),
                            None => Err(McpError::Connection(
                                "handshake body ended without a clientId".to_string(),
                            )),
                        };
                    }
                }
            }
        };

        let (client_id, stream, raw) = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(found)) => found,
            Ok(Err(error)) => {
                self.abandon(generation);
                return Err(error);
            }
            Err(_) => {
                self.abandon(generation);
                return Err(McpError::ClientIdTimeout { timeout });
            }
        };

        if !self.shared.install_session(&client_id, generation) {
            return Err(McpError::Connection(
                "handshake superseded by a newer connection".to_string(),
            ));
        }
        let handle = tokio::spawn(listen(
            stream,
            raw,
            None,
            Arc::clone(&self.shared),
            generation,
        ));
        self.store_listener(generation, handle);
        debug!(%client_id, "fallback handshake succeeded");
        Ok(client_id)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(listener) = self.shared.lock().listener.take() {
            listener.abort();
        }
    }
}

/// Reads one event stream until it ends, routing tool events and session updates.
async fn listen<S, B, E>(
    mut stream: S,
    initial: Vec<u8>,
    mut handshake: Option<oneshot::Sender<String>>,
    shared: Arc<Shared>,
    generation: u64,
) where
    S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut parser = SseStreamParser::default();
    let mut pending = parser.feed(&initial);

    let reason = loop {
        for event in pending.drain(..) {
            match event {
                ServerEvent::Connected { client_id } => {
                    if shared.install_session(&client_id, generation) {
                        if let Some(tx) = handshake.take() {
                            let _ = tx.send(client_id);
                        }
                    }
                }
                ServerEvent::Ping => {}
                ServerEvent::Unknown { event_type, .. } => {
                    debug!(%event_type, "ignoring unknown stream event");
                }
                event => {
                    shared.router.dispatch(event);
                }
            }
        }

        match stream.next().await {
            Some(Ok(chunk)) => pending = parser.feed(chunk.as_ref()),
            Some(Err(error)) => break format!("stream error: {error}"),
            None => break "stream ended".to_string(),
        }
    };

    shared.stream_lost(generation, &reason);
}

#[cfg(test)]
mod tests {
    use super::{ConnectionManager, ConnectionStatus};
    use crate::config::McpClientConfig;

    #[test]
    fn new_manager_starts_disconnected_without_client_id() {
        let manager =
            ConnectionManager::new(McpClientConfig::new("http://127.0.0.1:9")).expect("manager");
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert_eq!(snapshot.client_id, None);
        assert_eq!(snapshot.endpoint_url, "http://127.0.0.1:9/sse");
        assert!(manager.verify_client_id().is_err());
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(ConnectionManager::new(McpClientConfig::new("not a url")).is_err());
    }
}
