//! Interactive tool-server agent: approval gate, task orchestration and the
//! runtime loop that ties them to a tool session, a planner and the task store.
//!
//! ## Configuration
//!
//! `task_agent` reads its setup from the environment:
//!
//! - `TASK_AGENT_SERVER_URL` base URL of the tool server (`http` or `https`)
//! - `TASK_AGENT_SESSION_KEY` task store slot, `default` when unset
//! - `TASK_AGENT_STEP_LIMIT` cap on executed commands per task, `25` when unset
//! - `TASK_AGENT_PLANNER` command planner, `rules` when unset
//!
//! `TASK_AGENT_CONFIG_PATH` may point at a UTF-8 JSON file with this shape:
//!
//! ```json
//! {
//!   "server_url": "http://127.0.0.1:8080",
//!   "handshake_timeout_ms": 10000,
//!   "client_id_ttl_sec": 1800,
//!   "invoke_timeout_sec": 30,
//!   "request_timeout_sec": 30,
//!   "step_limit": 25,
//!   "session_key": "default",
//!   "store_dir": ".agent/tasks",
//!   "reconnect": {"base_delay_ms": 1000, "multiplier": 2.0, "max_delay_ms": 30000, "jitter": 0.2, "max_attempts": 5},
//!   "paths": {"sse": "/sse", "tools": "/tools", "invoke": "/invoke", "info": "/info"}
//! }
//! ```
//!
//! Contract notes:
//! - Every field is optional; environment variables override file values.
//! - Durations and limits must be > 0.
//! - Unknown JSON fields are rejected.

pub mod approval;
pub mod commands;
pub mod config;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod planners;
pub mod runtime;
pub mod session;
