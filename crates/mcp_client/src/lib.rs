//! Client for event-stream tool servers.
//!
//! This crate owns the session to one tool server: the `connected{clientId}`
//! handshake over the event stream, bounded reconnection with jittered
//! backoff plus a single raw-body fallback, tool discovery, and serialized
//! command execution with result correlation. It contains no orchestration or
//! approval logic.
//!
//! Session state is owned by [`ConnectionManager`]. [`ToolRegistry`] and
//! [`Executor`] only read it (and ask for verification), so a connected status
//! without a live clientId cannot be represented.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod executor;
pub mod handshake;
pub mod payload;
pub mod registry;
pub mod retry;
mod router;
pub mod sse;
pub mod url;

pub use client::{McpHttpClient, ServerInfo};
pub use config::{EndpointPaths, McpClientConfig};
pub use connection::{ConnectionManager, ConnectionSnapshot, ConnectionStatus};
pub use error::McpError;
pub use events::ServerEvent;
pub use executor::Executor;
pub use registry::ToolRegistry;
pub use retry::{Backoff, BackoffPolicy};
pub use sse::SseStreamParser;
