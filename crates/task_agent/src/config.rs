use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mcp_client::{BackoffPolicy, EndpointPaths, McpClientConfig};
use serde::Deserialize;
use thiserror::Error;

use crate::orchestrator::OrchestratorConfig;

pub const SERVER_URL_ENV_VAR: &str = "TASK_AGENT_SERVER_URL";
pub const CONFIG_PATH_ENV_VAR: &str = "TASK_AGENT_CONFIG_PATH";
pub const SESSION_KEY_ENV_VAR: &str = "TASK_AGENT_SESSION_KEY";
pub const STEP_LIMIT_ENV_VAR: &str = "TASK_AGENT_STEP_LIMIT";
pub const DEFAULT_SESSION_KEY: &str = "default";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no tool server configured; set TASK_AGENT_SERVER_URL or `server_url` in the config file")]
    MissingServerUrl,

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// JSON config file shape. Every field is optional; unknown fields are rejected.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub server_url: Option<String>,
    pub handshake_timeout_ms: Option<u64>,
    pub client_id_ttl_sec: Option<u64>,
    pub invoke_timeout_sec: Option<u64>,
    pub request_timeout_sec: Option<u64>,
    pub step_limit: Option<u32>,
    pub session_key: Option<String>,
    pub store_dir: Option<PathBuf>,
    pub reconnect: Option<ReconnectFileConfig>,
    pub paths: Option<PathsFileConfig>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectFileConfig {
    pub base_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<f64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsFileConfig {
    pub sse: Option<String>,
    pub tools: Option<String>,
    pub invoke: Option<String>,
    pub info: Option<String>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub client: McpClientConfig,
    pub orchestrator: OrchestratorConfig,
    pub session_key: String,
    /// Task store root; `None` means `<cwd>/.agent/tasks`.
    pub store_dir: Option<PathBuf>,
}

pub fn config_from_env() -> Result<AgentConfig, ConfigError> {
    config_from_lookup(|name| std::env::var(name).ok())
}

/// Resolves configuration from a variable lookup. Environment values win over the file.
pub fn config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<AgentConfig, ConfigError> {
    let var = |name: &str| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let file = match var(CONFIG_PATH_ENV_VAR) {
        Some(path) => load_file_config(Path::new(&path))?,
        None => FileConfig::default(),
    };

    let step_limit = match var(STEP_LIMIT_ENV_VAR) {
        Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
            ConfigError::invalid(
                "step_limit",
                format!("{STEP_LIMIT_ENV_VAR}={raw} is not a number"),
            )
        })?),
        None => file.step_limit,
    };

    resolve(
        file.clone(),
        var(SERVER_URL_ENV_VAR).or(file.server_url),
        var(SESSION_KEY_ENV_VAR).or(file.session_key),
        step_limit,
    )
}

pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve(
    file: FileConfig,
    server_url: Option<String>,
    session_key: Option<String>,
    step_limit: Option<u32>,
) -> Result<AgentConfig, ConfigError> {
    let server_url = server_url.ok_or(ConfigError::MissingServerUrl)?;
    let mut client = McpClientConfig::new(server_url);

    if let Some(ms) = file.handshake_timeout_ms {
        let timeout = Duration::from_millis(positive("handshake_timeout_ms", ms)?);
        client = client.with_handshake_timeout(timeout);
    }
    if let Some(secs) = file.client_id_ttl_sec {
        let ttl = Duration::from_secs(positive("client_id_ttl_sec", secs)?);
        client = client.with_client_id_ttl(ttl);
    }
    if let Some(secs) = file.invoke_timeout_sec {
        let timeout = Duration::from_secs(positive("invoke_timeout_sec", secs)?);
        client = client.with_invoke_timeout(timeout);
    }
    if let Some(secs) = file.request_timeout_sec {
        let timeout = Duration::from_secs(positive("request_timeout_sec", secs)?);
        client = client.with_request_timeout(timeout);
    }
    if let Some(reconnect) = file.reconnect {
        client = client.with_reconnect(reconnect_policy(reconnect)?);
    }
    if let Some(paths) = file.paths {
        client = client.with_paths(endpoint_paths(paths)?);
    }

    let mut orchestrator = OrchestratorConfig::default();
    if let Some(limit) = step_limit {
        if limit == 0 {
            return Err(ConfigError::invalid("step_limit", "must be > 0"));
        }
        orchestrator = orchestrator.with_step_limit(limit);
    }

    Ok(AgentConfig {
        client,
        orchestrator,
        session_key: session_key.unwrap_or_else(|| DEFAULT_SESSION_KEY.to_string()),
        store_dir: file.store_dir,
    })
}

fn reconnect_policy(file: ReconnectFileConfig) -> Result<BackoffPolicy, ConfigError> {
    let mut policy = BackoffPolicy::default();
    if let Some(ms) = file.base_delay_ms {
        policy.base_delay = Duration::from_millis(positive("reconnect.base_delay_ms", ms)?);
    }
    if let Some(ms) = file.max_delay_ms {
        policy.max_delay = Duration::from_millis(positive("reconnect.max_delay_ms", ms)?);
    }
    if let Some(multiplier) = file.multiplier {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::invalid("reconnect.multiplier", "must be >= 1.0"));
        }
        policy.multiplier = multiplier;
    }
    if let Some(jitter) = file.jitter {
        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::invalid("reconnect.jitter", "must be within 0.0..=1.0"));
        }
        policy.jitter = jitter;
    }
    if let Some(attempts) = file.max_attempts {
        if attempts == 0 {
            return Err(ConfigError::invalid("reconnect.max_attempts", "must be > 0"));
        }
        policy.max_attempts = attempts;
    }
    if policy.max_delay < policy.base_delay {
        return Err(ConfigError::invalid(
            "reconnect.max_delay_ms",
            "must not be below base_delay_ms",
        ));
    }
    Ok(policy)
}

fn endpoint_paths(file: PathsFileConfig) -> Result<EndpointPaths, ConfigError> {
    let defaults = EndpointPaths::default();
    Ok(EndpointPaths {
        sse: path_or("paths.sse", file.sse, defaults.sse)?,
        tools: path_or("paths.tools", file.tools, defaults.tools)?,
        invoke: path_or("paths.invoke", file.invoke, defaults.invoke)?,
        info: path_or("paths.info", file.info, defaults.info)?,
    })
}

fn path_or(
    field: &'static str,
    value: Option<String>,
    default: String,
) -> Result<String, ConfigError> {
    match value.map(|path| path.trim().to_string()) {
        None => Ok(default),
        Some(path) if path.starts_with('/') => Ok(path),
        Some(_) => Err(ConfigError::invalid(field, "must start with '/'")),
    }
}

fn positive(field: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be > 0"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{
        config_from_lookup, ConfigError, CONFIG_PATH_ENV_VAR, SERVER_URL_ENV_VAR,
        SESSION_KEY_ENV_VAR, STEP_LIMIT_ENV_VAR,
    };

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent.json");
        std::fs::write(&path, contents).expect("write config");
        let path = path.to_string_lossy().into_owned();
        (dir, path)
    }

    #[test]
    fn server_url_is_required() {
        assert!(matches!(
            config_from_lookup(lookup(&[])),
            Err(ConfigError::MissingServerUrl)
        ));
        assert!(matches!(
            config_from_lookup(lookup(&[(SERVER_URL_ENV_VAR, "   ")])),
            Err(ConfigError::MissingServerUrl)
        ));
    }

    #[test]
    fn env_only_config_uses_defaults() {
        let config = config_from_lookup(lookup(&[(SERVER_URL_ENV_VAR, "http://127.0.0.1:9000")]))
            .expect("config");

        assert_eq!(config.client.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.client.client_id_ttl, Duration::from_secs(30 * 60));
        assert_eq!(config.orchestrator.step_limit, 25);
        assert_eq!(config.session_key, "default");
        assert_eq!(config.store_dir, None);
    }

    #[test]
    fn file_values_apply_and_env_overrides_win() {
        let (_dir, path) = write_config(
            r#"{
                "server_url": "http://file:1",
                "handshake_timeout_ms": 500,
                "client_id_ttl_sec": 60,
                "step_limit": 10,
                "session_key": "from-file",
                "reconnect": {"base_delay_ms": 10, "max_delay_ms": 100, "max_attempts": 3},
                "paths": {"invoke": "/messages"}
            }"#,
        );

        let config = config_from_lookup(lookup(&[
            (CONFIG_PATH_ENV_VAR, path.as_str()),
            (SESSION_KEY_ENV_VAR, "from-env"),
            (STEP_LIMIT_ENV_VAR, "40"),
        ]))
        .expect("config");

        assert_eq!(config.client.base_url, "http://file:1");
        assert_eq!(config.client.handshake_timeout, Duration::from_millis(500));
        assert_eq!(config.client.client_id_ttl, Duration::from_secs(60));
        assert_eq!(config.client.reconnect.max_attempts, 3);
        assert_eq!(config.client.reconnect.base_delay, Duration::from_millis(10));
        assert_eq!(config.client.paths.invoke, "/messages");
        assert_eq!(config.client.paths.sse, "/sse");
        assert_eq!(config.session_key, "from-env");
        assert_eq!(config.orchestrator.step_limit, 40);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let (_dir, path) = write_config(r#"{"server_url": "http://x:1", "model": "gpt"}"#);
        assert!(matches!(
            config_from_lookup(lookup(&[(CONFIG_PATH_ENV_VAR, path.as_str())])),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn zero_durations_and_limits_are_rejected() {
        let (_dir, path) = write_config(r#"{"server_url": "http://x:1", "invoke_timeout_sec": 0}"#);
        assert!(matches!(
            config_from_lookup(lookup(&[(CONFIG_PATH_ENV_VAR, path.as_str())])),
            Err(ConfigError::Invalid {
                field: "invoke_timeout_sec",
                ..
            })
        ));

        assert!(matches!(
            config_from_lookup(lookup(&[
                (SERVER_URL_ENV_VAR, "http://x:1"),
                (STEP_LIMIT_ENV_VAR, "0"),
            ])),
            Err(ConfigError::Invalid {
                field: "step_limit",
                ..
            })
        ));
    }

    #[test]
    fn missing_config_file_is_reported() {
        assert!(matches!(
            config_from_lookup(lookup(&[(CONFIG_PATH_ENV_VAR, "/definitely/not/here.json")])),
            Err(ConfigError::Read { .. })
        ));
    }
}
