use url::Url;

use crate::error::McpError;

/// Validates a tool-server base URL. Only `http` and `https` are accepted.
pub fn validate_base_url(input: &str) -> Result<Url, McpError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(McpError::InvalidBaseUrl("base URL is empty".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|error| McpError::InvalidBaseUrl(format!("{trimmed}: {error}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(McpError::InvalidBaseUrl(format!(
            "{trimmed}: unsupported scheme '{other}'"
        ))),
    }
}

/// Joins a base URL and an endpoint path with exactly one separating slash.
///
/// Query strings on the path (`/messages?x=1`) are kept verbatim.
pub fn endpoint_url(base: &str, path: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let path = path.trim().trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{base}/{path}")
}
