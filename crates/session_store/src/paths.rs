use std::path::{Path, PathBuf};

use crate::error::SessionStoreError;

pub const TASK_DIR: [&str; 2] = [".agent", "tasks"];
pub const ARCHIVE_DIR: &str = "archive";

#[must_use]
pub fn task_root(cwd: &Path) -> PathBuf {
    cwd.join(TASK_DIR[0]).join(TASK_DIR[1])
}

#[must_use]
pub fn archive_root(root: &Path) -> PathBuf {
    root.join(ARCHIVE_DIR)
}

/// Session keys become file names, so only a conservative alphabet is allowed.
pub fn validate_session_key(key: &str) -> Result<(), SessionStoreError> {
    let invalid = |reason| SessionStoreError::InvalidSessionKey {
        key: key.to_string(),
        reason,
    };
    if key.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if key.len() > 128 {
        return Err(invalid("must be at most 128 characters"));
    }
    if key.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("may only contain ASCII letters, digits, '-', '_' and '.'"));
    }
    Ok(())
}

#[must_use]
pub fn sanitize_timestamp_for_filename(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn session_file_name(session_key: &str) -> String {
    format!("{session_key}.json")
}

#[must_use]
pub fn archive_file_name(archived_at: &str, session_key: &str, task_id: &str) -> String {
    format!(
        "{}_{session_key}_{task_id}.json",
        sanitize_timestamp_for_filename(archived_at)
    )
}
