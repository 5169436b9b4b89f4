use std::sync::OnceLock;

use regex::Regex;

fn client_id_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r#"(?i)"?(?:client_?id|session_?id)"?\s*[:=]\s*"?([A-Za-z0-9._\-]+)"?"#)
            .expect("client id regex must compile")
    })
}

/// Scans raw response text for a clientId when no `connected` event was parsed.
///
/// Accepts `"clientId":"x"`, `clientId=x`, `session_id: x` and similar forms.
pub fn extract_client_id(raw: &str) -> Option<String> {
    client_id_regex()
        .captures(raw)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_string())
        .filter(|value| !value.is_empty())
}
